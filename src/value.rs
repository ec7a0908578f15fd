//! `IRValue`, the universal currency passed between lowering functions.

/// Marks an `IRValue` as something other than a first-class expression
/// result (e.g. a resolved module object, or the `syscall` builtin name).
pub const SENTINEL_MODULE: &str = "module";
pub const SENTINEL_INTERNAL_SYSCALL: &str = "internal_syscall";

/// `{ funcPtr*, i8* }*` — the uniform closure object shape, shared by
/// [`IRValue::is_closure_type`] and `coerce`'s pointer-bitcast guard (see
/// `lower/expr.rs`) so the two checks can never drift apart.
///
/// A plain substring search for `"i8* }*"` is not enough: a function that
/// simply *returns* a closure (e.g. `make_counter(): fun():int`) has the
/// function-symbol type `{ i64 (i8*)*, i8* }* ()*`, which also contains
/// that substring without itself being a closure object. This walks the
/// braces/parens to confirm the whole string is exactly `{ X, i8* }*` for
/// some top-level field `X`, not merely a string that happens to embed a
/// closure shape somewhere inside a larger function-pointer type.
pub fn is_closure_shape(ty: &str) -> bool {
    let Some(body) = ty.strip_prefix("{ ").and_then(|s| s.strip_suffix(" }*")) else {
        return false;
    };
    top_level_comma_fields(body).len() == 2
}

/// Splits `s` on commas that sit outside any `(...)`/`{...}` nesting.
fn top_level_comma_fields(s: &str) -> Vec<&str> {
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut fields = Vec::new();
    for (i, c) in s.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                fields.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(s[start..].trim());
    fields
}

/// One lowered expression result.
///
/// `address`, `ptr`/`ptr_type`, and `class_instance_ptr`/`class_instance_ptr_type`
/// are back-references consumed by the caller to support implicit reference
/// passing, address-of/dereference, and bound method calls without forcing
/// every visitor to re-derive them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IRValue {
    /// Textual LLVM operand: a register (`%t17`), a global (`@foo`), or an
    /// immediate (`42`).
    pub value: String,
    /// Textual LLVM type of `value`.
    pub ty: String,
    /// If `value` came from a `load`, the pointer it was loaded from.
    pub address: Option<String>,
    /// For address-of results encoded as `i64`: the underlying typed pointer.
    pub ptr: Option<String>,
    pub ptr_type: Option<String>,
    /// For method references resolved via `GetExpr`: the bound receiver to
    /// inject as the implicit first argument at the next call.
    pub class_instance_ptr: Option<String>,
    pub class_instance_ptr_type: Option<String>,
    /// The mangled symbol backing a callable value, when statically known
    /// (a named function, a bound method, or a module export) — lets call
    /// sites look up SRET/arity metadata precisely instead of re-deriving it
    /// from the type string, which is ambiguous for methods.
    pub called_symbol: Option<String>,
}

impl IRValue {
    pub fn new(value: impl Into<String>, ty: impl Into<String>) -> Self {
        IRValue {
            value: value.into(),
            ty: ty.into(),
            address: None,
            ptr: None,
            ptr_type: None,
            class_instance_ptr: None,
            class_instance_ptr_type: None,
            called_symbol: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_ptr(mut self, ptr: impl Into<String>, ptr_type: impl Into<String>) -> Self {
        self.ptr = Some(ptr.into());
        self.ptr_type = Some(ptr_type.into());
        self
    }

    pub fn with_class_instance_ptr(
        mut self,
        ptr: impl Into<String>,
        ptr_type: impl Into<String>,
    ) -> Self {
        self.class_instance_ptr = Some(ptr.into());
        self.class_instance_ptr_type = Some(ptr_type.into());
        self
    }

    pub fn with_called_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.called_symbol = Some(symbol.into());
        self
    }

    pub fn is_pointer_type(&self) -> bool {
        self.ty.ends_with('*')
    }

    pub fn null() -> Self {
        IRValue::new("null", "void")
    }

    pub fn is_closure_type(&self) -> bool {
        is_closure_shape(&self.ty)
    }

    pub fn is_module(&self) -> bool {
        self.ty == SENTINEL_MODULE
    }

    pub fn is_internal_syscall(&self) -> bool {
        self.ty == SENTINEL_INTERNAL_SYSCALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_has_no_back_references() {
        let v = IRValue::new("%t3", "i64");
        assert_eq!(v.value, "%t3");
        assert_eq!(v.ty, "i64");
        assert!(v.address.is_none());
        assert!(!v.is_pointer_type());
    }

    #[test]
    fn pointer_type_is_detected_from_trailing_star() {
        let v = IRValue::new("%t4", "%struct.string*");
        assert!(v.is_pointer_type());
    }

    #[test]
    fn closure_type_detection() {
        let v = IRValue::new("%t5", "{ i64 (i8*)*, i8* }*");
        assert!(v.is_closure_type());
        let v = IRValue::new("%t6", "i64");
        assert!(!v.is_closure_type());
    }

    #[test]
    fn a_function_returning_a_closure_is_not_itself_mistaken_for_one() {
        // `make_counter(): fun():int`'s own symbol type — a plain function,
        // called with no environment argument, that happens to return a
        // closure object. A naive substring search for "i8* }*" matches this
        // (it appears inside the return type) and would wrongly send the
        // call through the closure-call path.
        let v = IRValue::new("@make_counter", "{ i64 (i8*)*, i8* }* ()*");
        assert!(!v.is_closure_type());
    }

    #[test]
    fn a_closure_returning_a_closure_is_still_detected() {
        let v = IRValue::new("%t7", "{ { i64 (i8*)*, i8* }* (i8*)*, i8* }*");
        assert!(v.is_closure_type());
    }
}
