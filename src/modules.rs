//! ClassEntry / ModuleObject / ModuleObjectBuilder.
//!
//! The module side is grounded on `src/loader/mod.rs`'s `Module`/`Modules`
//! registry (path-keyed, recursive, `resolve()` for symbol names); the class
//! side on `why_lib`'s `struct_declaration.rs`/`instance.rs` typed-AST
//! (ordered member map, a method table keyed by name including a
//! `constructor` entry).

use std::collections::HashMap;

use crate::ast::{ClassDecl, FunctionDecl, StructDecl, TopLevelItem};
use crate::error::CodegenError;
use crate::mangle::MangleContext;
use crate::orchestrator::LoweringContext;
use crate::value::IRValue;

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub llvm_type: String,
    pub index: usize,
}

/// One user-defined class or struct. Struct declarations are represented
/// with an empty `methods` map.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub llvm_type: String,
    pub member_order: Vec<String>,
    pub members: HashMap<String, MemberInfo>,
    pub methods: HashMap<String, FunctionDecl>,
}

impl ClassEntry {
    pub fn from_struct_decl(decl: &StructDecl, field_types: Vec<String>) -> Self {
        let mut members = HashMap::new();
        let mut member_order = Vec::new();
        for (index, (member, llvm_type)) in decl.members.iter().zip(field_types).enumerate() {
            members.insert(member.name.clone(), MemberInfo { llvm_type, index });
            member_order.push(member.name.clone());
        }
        ClassEntry {
            llvm_type: format!("%struct.{}", decl.name),
            member_order,
            members,
            methods: HashMap::new(),
        }
    }

    pub fn from_class_decl(decl: &ClassDecl, field_types: Vec<String>) -> Self {
        let mut members = HashMap::new();
        let mut member_order = Vec::new();
        for (index, (member, llvm_type)) in decl.members.iter().zip(field_types).enumerate() {
            members.insert(member.name.clone(), MemberInfo { llvm_type, index });
            member_order.push(member.name.clone());
        }
        let methods = decl.methods.iter().map(|m| (m.name.clone(), m.clone())).collect();
        ClassEntry {
            llvm_type: format!("%struct.{}", decl.name),
            member_order,
            members,
            methods,
        }
    }

    pub fn field_llvm_types(&self) -> Vec<String> {
        self.member_order.iter().map(|n| self.members[n].llvm_type.clone()).collect()
    }

    pub fn constructor(&self) -> Option<&FunctionDecl> {
        self.methods.get("constructor")
    }
}

#[derive(Debug, Clone)]
pub struct ModuleMember {
    pub llvm_type: String,
    pub index: usize,
    /// Mangled symbol used to initialize this field in the module object's
    /// global initializer list.
    pub ptr: String,
}

/// One imported module. Compile-time sealed: once built, callers resolve
/// exports via GEP-and-load, never dynamic lookup.
#[derive(Debug, Clone)]
pub struct ModuleObject {
    pub struct_name: String,
    pub global_name: String,
    pub member_order: Vec<String>,
    pub members: HashMap<String, ModuleMember>,
    pub initialized: bool,
}

/// Builds module objects lazily, guarding recursive imports with the set of
/// paths currently (or already) built.
pub struct ModuleObjectBuilder;

impl ModuleObjectBuilder {
    /// Fetches (building if necessary) the `ModuleObject` for `path`.
    /// Returns an `IRValue` of the sentinel `module` type bound to the
    /// module's struct-pointer global — this is what `ImportStmt` binds in
    /// the global scope.
    pub fn build(ctx: &mut LoweringContext, path: &str) -> Result<IRValue, CodegenError> {
        if let Some(existing) = ctx.module_objects.get(path) {
            return Ok(module_value(existing));
        }

        let mangled_path = sanitize_module_path(path);
        let struct_name = format!("%struct.module_{mangled_path}");
        let global_name = format!("@module_{mangled_path}");

        // Insert a placeholder before recursing so a cycle resolves to the
        // same (possibly still-being-populated) global instead of looping.
        ctx.module_objects.insert(
            path.to_string(),
            ModuleObject {
                struct_name: struct_name.clone(),
                global_name: global_name.clone(),
                member_order: Vec::new(),
                members: HashMap::new(),
                initialized: false,
            },
        );

        let items = ctx
            .module_registry
            .get(path)
            .cloned()
            .unwrap_or_default();

        // Imports within the imported module are processed first so any
        // module object it itself depends on exists before we touch its
        // functions.
        for item in &items {
            if let TopLevelItem::Import(import) = item {
                Self::build(ctx, &import.path)?;
            }
        }

        // Struct/class declarations must exist before function signatures
        // that reference them.
        for item in &items {
            match item {
                TopLevelItem::StructDecl(decl) => {
                    ctx.declare_struct(decl)?;
                }
                TopLevelItem::ClassDecl(decl) => {
                    ctx.declare_class(decl)?;
                }
                _ => {}
            }
        }

        let saved_path = ctx.current_source_path.clone();
        ctx.current_source_path = path.to_string();

        let mut member_order = Vec::new();
        let mut members = HashMap::new();
        for item in &items {
            match item {
                TopLevelItem::FunctionDecl(func) if func.exported => {
                    let mangled = ctx.mangler.mangle(
                        &func.name,
                        &MangleContext::Exported { source_path: path.to_string() },
                    );
                    let fn_ptr_type = ctx.declare_and_define_module_function(func, &mangled)?;
                    let index = member_order.len();
                    members.insert(
                        func.name.clone(),
                        ModuleMember { llvm_type: fn_ptr_type, index, ptr: mangled },
                    );
                    member_order.push(func.name.clone());
                }
                TopLevelItem::DeclareFn(decl) => {
                    let fn_ptr_type = ctx.declare_foreign_function(decl)?;
                    let index = member_order.len();
                    members.insert(
                        decl.name.clone(),
                        ModuleMember { llvm_type: fn_ptr_type, index, ptr: decl.name.clone() },
                    );
                    member_order.push(decl.name.clone());
                }
                _ => {}
            }
        }

        ctx.current_source_path = saved_path;

        let module_object = ModuleObject {
            struct_name: struct_name.clone(),
            global_name: global_name.clone(),
            member_order,
            members,
            initialized: true,
        };
        ctx.emit_module_object_decl(&module_object);
        ctx.module_objects.insert(path.to_string(), module_object.clone());
        Ok(module_value(&module_object))
    }
}

fn module_value(module: &ModuleObject) -> IRValue {
    let mut v = IRValue::new(module.global_name.clone(), "module");
    v.ptr = Some(module.global_name.clone());
    v.ptr_type = Some(format!("{}*", module.struct_name));
    v
}

fn sanitize_module_path(path: &str) -> String {
    let trimmed = path.strip_suffix(".yu").unwrap_or(path);
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_module_path_replaces_separators() {
        assert_eq!(sanitize_module_path("std/io.yu"), "std_io");
        assert_eq!(sanitize_module_path("std/io"), "std_io");
    }

    #[test]
    fn class_entry_field_order_matches_declaration_order() {
        let decl = ClassDecl {
            name: "Pair".into(),
            members: vec![
                crate::ast::StructMember {
                    name: "a".into(),
                    type_annotation: crate::ast::TypeAnnotation::Named("int".into()),
                },
                crate::ast::StructMember {
                    name: "b".into(),
                    type_annotation: crate::ast::TypeAnnotation::Named("int".into()),
                },
            ],
            methods: vec![],
            position: ("t.yu".into(), 1, 1),
        };
        let entry = ClassEntry::from_class_decl(&decl, vec!["i64".into(), "i64".into()]);
        assert_eq!(entry.member_order, vec!["a", "b"]);
        assert_eq!(entry.members["b"].index, 1);
    }
}
