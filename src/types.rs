//! TypeMapper: source type annotations → LLVM type strings, plus the
//! alignment/size tables the rest of the engine consults when it needs to
//! materialize storage.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::ast::TypeAnnotation;

/// Maps [`TypeAnnotation`]s to textual LLVM types.
///
/// Array types are descriptor structs (`%struct.array.<elem>`) synthesized
/// the first time a given element type is seen; [`TypeMapper`] buffers their
/// declarations and hands them to the orchestrator to hoist to module scope,
/// mirroring the way `RuntimeEmitter`'s lang-item structs are emitted once
/// and referenced by name thereafter.
#[derive(Debug, Default)]
pub struct TypeMapper {
    emitted_array_descriptors: RefCell<HashSet<String>>,
    pending_array_decls: RefCell<Vec<String>>,
    /// struct name -> element LLVM type, so `.ptr`/GetExpr lowering can
    /// recover the element type without reverse-sanitizing the descriptor
    /// name (lossy: non-alphanumeric characters all collapse to `_`).
    array_elem_types: RefCell<HashMap<String, String>>,
}

impl TypeMapper {
    pub fn new() -> Self {
        TypeMapper::default()
    }

    /// Maps a type annotation to its LLVM type string. `known_classes` is
    /// consulted only to decide whether a bare name is a known user type;
    /// callers raise `UnknownClass` themselves when a name isn't found.
    pub fn map(&self, annotation: &TypeAnnotation) -> String {
        match annotation {
            TypeAnnotation::Named(name) => self.map_named(name),
            TypeAnnotation::Pointer(inner) => format!("{}*", self.map(inner)),
            TypeAnnotation::Array(elem) => self.array_descriptor_type(&self.map(elem)),
            TypeAnnotation::Function { params, return_type } => {
                // Matches the closure object `FunctionLiteralExpr` lowering
                // actually produces (`{ RET (i8*, P...)*, i8* }*`, env
                // pointer always present, even for a non-capturing literal)
                // rather than a bare function-pointer type, so a capturing
                // closure flowing through a `fun(...): T`-typed return slot
                // or binding keeps its environment instead of being
                // `bitcast` down to a dangling function pointer in `coerce`.
                let ret = self.map(return_type);
                let mut param_types = vec!["i8*".to_string()];
                param_types.extend(params.iter().map(|p| self.map(p)));
                let fn_ptr_ty = format!("{ret} ({})*", param_types.join(", "));
                format!("{{ {fn_ptr_ty}, i8* }}*")
            }
        }
    }

    fn map_named(&self, name: &str) -> String {
        match name {
            "int" => "i64".to_string(),
            "bool" => "i1".to_string(),
            "char" => "i8".to_string(),
            "float" => "f32".to_string(),
            "double" => "f64".to_string(),
            "void" => "void".to_string(),
            // Already a pointer, unlike other struct-backed types — `string`
            // values are always passed and returned by reference, never via
            // the SRET convention (see `register_signature` in
            // `lower/stmt.rs`).
            "string" => "%struct.string*".to_string(),
            other => format!("%struct.{other}"),
        }
    }

    /// Returns the descriptor struct type for an array of `elem_llvm_type`,
    /// emitting its declaration on first use.
    pub fn array_descriptor_type(&self, elem_llvm_type: &str) -> String {
        let mangled_elem = sanitize_type_component(elem_llvm_type);
        let struct_name = format!("%struct.array.{mangled_elem}");
        self.array_elem_types
            .borrow_mut()
            .entry(struct_name.clone())
            .or_insert_with(|| elem_llvm_type.to_string());
        let mut emitted = self.emitted_array_descriptors.borrow_mut();
        if emitted.insert(struct_name.clone()) {
            self.pending_array_decls.borrow_mut().push(format!(
                "{struct_name} = type {{ {elem_llvm_type}*, i64, i64 }}"
            ));
        }
        struct_name
    }

    /// Recovers the element LLVM type for a `%struct.array.*` descriptor
    /// previously returned by [`TypeMapper::array_descriptor_type`].
    pub fn array_elem_type(&self, struct_name: &str) -> Option<String> {
        self.array_elem_types.borrow().get(struct_name).cloned()
    }

    /// Drains and returns the array descriptor declarations accumulated
    /// since the last call. The orchestrator splices these into the
    /// "user/imported type declarations" section (§6, output part 6).
    pub fn take_pending_array_decls(&self) -> Vec<String> {
        std::mem::take(&mut self.pending_array_decls.borrow_mut())
    }

    /// Alignment, in bytes, of an LLVM scalar or pointer type. Structs align
    /// to their widest field; callers with a `ClassEntry` compute that
    /// separately via [`TypeMapper::struct_alignment`].
    pub fn alignment(llvm_type: &str) -> u32 {
        if llvm_type.ends_with('*') {
            return 8;
        }
        match llvm_type {
            "i64" | "f64" => 8,
            "i32" | "f32" => 4,
            "i16" => 2,
            "i1" | "i8" => 1,
            _ => 8,
        }
    }

    /// Size, in bytes, of a scalar or pointer type (what `yulang_malloc`
    /// rounds against and what NewExpr's size computation needs for
    /// primitive-only members).
    pub fn size_of(llvm_type: &str) -> u32 {
        if llvm_type.ends_with('*') {
            return 8;
        }
        match llvm_type {
            "i64" | "f64" => 8,
            "i32" | "f32" => 4,
            "i16" => 2,
            "i1" | "i8" => 1,
            "void" => 0,
            _ => 8,
        }
    }

    /// A struct's alignment is the max alignment among its field types.
    pub fn struct_alignment(field_types: &[String]) -> u32 {
        field_types.iter().map(|t| Self::alignment(t)).max().unwrap_or(1)
    }
}

fn sanitize_type_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_map_to_fixed_width_integers() {
        let mapper = TypeMapper::new();
        assert_eq!(mapper.map(&TypeAnnotation::Named("int".into())), "i64");
        assert_eq!(mapper.map(&TypeAnnotation::Named("bool".into())), "i1");
        assert_eq!(mapper.map(&TypeAnnotation::Named("char".into())), "i8");
        assert_eq!(mapper.map(&TypeAnnotation::Named("float".into())), "f32");
        assert_eq!(mapper.map(&TypeAnnotation::Named("double".into())), "f64");
    }

    #[test]
    fn pointer_wraps_the_pointee() {
        let mapper = TypeMapper::new();
        let t = mapper.map(&TypeAnnotation::Pointer(Box::new(TypeAnnotation::Named("int".into()))));
        assert_eq!(t, "i64*");
    }

    #[test]
    fn user_struct_maps_by_name() {
        let mapper = TypeMapper::new();
        assert_eq!(mapper.map(&TypeAnnotation::Named("Counter".into())), "%struct.Counter");
    }

    #[test]
    fn array_descriptor_is_emitted_once_per_elem_type() {
        let mapper = TypeMapper::new();
        let t1 = mapper.map(&TypeAnnotation::Array(Box::new(TypeAnnotation::Named("int".into()))));
        let t2 = mapper.map(&TypeAnnotation::Array(Box::new(TypeAnnotation::Named("int".into()))));
        assert_eq!(t1, t2);
        let pending = mapper.take_pending_array_decls();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains("i64*, i64, i64"));
        // second map() call did not queue another declaration
        assert!(mapper.take_pending_array_decls().is_empty());
    }

    #[test]
    fn function_type_formats_as_a_closure_object_with_a_leading_env_param() {
        let mapper = TypeMapper::new();
        let t = mapper.map(&TypeAnnotation::Function {
            params: vec![TypeAnnotation::Named("int".into())],
            return_type: Box::new(TypeAnnotation::Named("bool".into())),
        });
        assert_eq!(t, "{ i1 (i8*, i64)*, i8* }*");
    }

    #[test]
    fn zero_param_function_type_still_carries_the_env_slot() {
        let mapper = TypeMapper::new();
        let t = mapper.map(&TypeAnnotation::Function {
            params: vec![],
            return_type: Box::new(TypeAnnotation::Named("int".into())),
        });
        assert_eq!(t, "{ i64 (i8*)*, i8* }*");
    }

    #[test]
    fn alignment_table_matches_spec() {
        assert_eq!(TypeMapper::alignment("i64*"), 8);
        assert_eq!(TypeMapper::alignment("i64"), 8);
        assert_eq!(TypeMapper::alignment("f64"), 8);
        assert_eq!(TypeMapper::alignment("i32"), 4);
        assert_eq!(TypeMapper::alignment("f32"), 4);
        assert_eq!(TypeMapper::alignment("i16"), 2);
        assert_eq!(TypeMapper::alignment("i1"), 1);
        assert_eq!(TypeMapper::alignment("i8"), 1);
    }
}
