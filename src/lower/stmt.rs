//! StatementLowerer: the two-phase top-level declare/define protocol and
//! statement-level lowering.
//!
//! Grounded on `src/compiler/mod.rs`'s forward-then-body pass over top-level
//! statements, generalized to register a function's signature (mangled
//! name, SRET-ness, parameter shape) in the declare pass so any call
//! appearing earlier in source than its callee's definition still resolves.

use crate::ast::{
    AssignmentStmt, Block, ClassDecl, Expr, FunctionDecl, GlobalBinding, IfStmt, LetStmt, Stmt,
    TopLevelItem, WhileStmt,
};
use crate::error::{CodegenError, Position};
use crate::mangle::MangleContext;
use crate::orchestrator::{FunctionMeta, LoweringContext};
use crate::scope::SymbolEntry;

use super::expr;
use super::expr::{is_struct_value_type, param_llvm_type, struct_byte_size};

/// Declare pass: registers every function/method signature and every
/// global binding before any body is lowered.
pub fn declare_top_level(ctx: &mut LoweringContext, item: &TopLevelItem) -> Result<(), CodegenError> {
    match item {
        TopLevelItem::Import(_) => Ok(()),
        TopLevelItem::DeclareFn(decl) => {
            if ctx.mark_declared(&decl.name) {
                ctx.declare_foreign_function(decl)?;
            }
            Ok(())
        }
        TopLevelItem::StructDecl(_) => Ok(()),
        TopLevelItem::ClassDecl(decl) => declare_class_methods(ctx, decl),
        TopLevelItem::FunctionDecl(func) => declare_function(ctx, func, None),
        TopLevelItem::GlobalLet(binding) => emit_global_binding(ctx, binding),
        TopLevelItem::GlobalConst(binding) => emit_global_binding(ctx, binding),
    }
}

/// Define pass: lowers every function/method body, in source order (spec
/// §5(d)).
pub fn define_top_level(ctx: &mut LoweringContext, item: &TopLevelItem) -> Result<(), CodegenError> {
    match item {
        TopLevelItem::Import(_) | TopLevelItem::DeclareFn(_) | TopLevelItem::StructDecl(_) => Ok(()),
        TopLevelItem::ClassDecl(decl) => define_class_methods(ctx, decl),
        TopLevelItem::FunctionDecl(func) => {
            let mangled = ctx.mangler.mangle(&func.name, &function_mangle_ctx(ctx, func, None));
            if ctx.mark_defined(&mangled) {
                lower_function_decl_with_name(ctx, func, &mangled, None)?;
            }
            Ok(())
        }
        TopLevelItem::GlobalLet(_) | TopLevelItem::GlobalConst(_) => Ok(()),
    }
}

fn declare_function(
    ctx: &mut LoweringContext,
    func: &FunctionDecl,
    class_name: Option<&str>,
) -> Result<(), CodegenError> {
    let (mangled, fn_ptr_type) = register_signature(ctx, func, class_name);
    if class_name.is_none() {
        ctx.scope.define_global(&func.name, SymbolEntry::new(fn_ptr_type, format!("@{mangled}"), 0));
    }
    Ok(())
}

fn declare_class_methods(ctx: &mut LoweringContext, decl: &ClassDecl) -> Result<(), CodegenError> {
    for method in &decl.methods {
        register_signature(ctx, method, Some(&decl.name));
    }
    Ok(())
}

fn define_class_methods(ctx: &mut LoweringContext, decl: &ClassDecl) -> Result<(), CodegenError> {
    for method in &decl.methods {
        let mangled = ctx
            .mangler
            .mangle(&method.name, &MangleContext::ClassMethod { class_name: decl.name.clone() });
        if ctx.mark_defined(&mangled) {
            lower_function_decl_with_name(ctx, method, &mangled, Some(&decl.name))?;
        }
    }
    Ok(())
}

fn function_mangle_ctx(
    ctx: &LoweringContext,
    func: &FunctionDecl,
    class_name: Option<&str>,
) -> MangleContext {
    if let Some(class_name) = class_name {
        MangleContext::ClassMethod { class_name: class_name.to_string() }
    } else if func.exported {
        MangleContext::Exported { source_path: ctx.current_source_path.clone() }
    } else {
        MangleContext::Plain
    }
}

/// Computes a function/method's mangled name, SRET-ness, and LLVM function
/// pointer type, and registers the result in `ctx.function_meta` — the
/// side table call sites consult instead of re-deriving SRET from the type
/// string, which is ambiguous once a `this` parameter is in play.
fn register_signature(
    ctx: &mut LoweringContext,
    func: &FunctionDecl,
    class_name: Option<&str>,
) -> (String, String) {
    let mangle_ctx = function_mangle_ctx(ctx, func, class_name);
    let mangled = ctx.mangler.mangle(&func.name, &mangle_ctx);
    let ret_ty = ctx.types.map(&func.return_type);
    // `string` maps to `%struct.string*` (already a pointer), so a function
    // returning `string` never takes this SRET path even though it returns a
    // struct-shaped value — it's passed/returned like any other reference
    // type instead. See DESIGN.md's open-question notes on `string`.
    let is_sret = is_struct_value_type(&ret_ty);
    let sret_ty = if is_sret { Some(ret_ty.clone()) } else { None };

    let mut param_types = Vec::new();
    if let Some(class_name) = class_name {
        param_types.push(format!("%struct.{class_name}*"));
    }
    if is_sret {
        param_types.push(format!("{ret_ty}*"));
    }
    for p in &func.params {
        param_types.push(param_llvm_type(ctx, &p.type_annotation));
    }
    let llvm_ret = if is_sret { "void".to_string() } else { ret_ty };
    let fn_ptr_type = format!("{llvm_ret} ({})*", param_types.join(", "));

    ctx.function_meta
        .insert(mangled.clone(), FunctionMeta { is_sret, sret_ty, is_method: class_name.is_some() });
    (mangled, fn_ptr_type)
}

/// Lowers and renders one function/method, pushing the finished `define`
/// text to `ctx`'s top-level definitions buffer. Returns the function
/// pointer's LLVM type string, as `ModuleObjectBuilder` needs.
pub fn lower_function_decl_with_name(
    ctx: &mut LoweringContext,
    func: &FunctionDecl,
    mangled_name: &str,
    class_name: Option<&str>,
) -> Result<String, CodegenError> {
    let (fn_ptr_type, text) = render_function(ctx, func, mangled_name, class_name)?;
    ctx.push_definition_text(text);
    Ok(fn_ptr_type)
}

/// Like [`lower_function_decl_with_name`] but for a nested `FunctionDecl`
/// statement, whose body must be spliced before the first ordinary
/// top-level `define` (hoisting) rather than emitted in place.
fn lower_nested_function_decl(ctx: &mut LoweringContext, func: &FunctionDecl) -> Result<(), CodegenError> {
    let mangled = ctx.mangler.mangle(&func.name, &MangleContext::Plain);
    if ctx.mark_defined(&mangled) {
        let (fn_ptr_type, text) = render_function(ctx, func, &mangled, None)?;
        ctx.scope.define_global(&func.name, SymbolEntry::new(fn_ptr_type, format!("@{mangled}"), 0));
        ctx.push_hoisted_define(text);
    }
    Ok(())
}

fn render_function(
    ctx: &mut LoweringContext,
    func: &FunctionDecl,
    mangled_name: &str,
    class_name: Option<&str>,
) -> Result<(String, String), CodegenError> {
    let (_, fn_ptr_type) = register_signature(ctx, func, class_name);
    let meta = ctx.function_meta.get(mangled_name).cloned().unwrap_or(FunctionMeta {
        is_sret: false,
        sret_ty: None,
        is_method: class_name.is_some(),
    });
    let ret_ty = ctx.types.map(&func.return_type);
    let llvm_ret = if meta.is_sret { "void".to_string() } else { ret_ty.clone() };

    let mut param_decls: Vec<String> = Vec::new();
    if let Some(class_name) = class_name {
        param_decls.push(format!("%struct.{class_name}* %this"));
    }
    if meta.is_sret {
        param_decls.push(format!("{ret_ty}* %agg.result"));
    }
    for p in &func.params {
        let ty = param_llvm_type(ctx, &p.type_annotation);
        param_decls.push(format!("{ty} %arg.{}", p.name));
    }

    let saved_ret_sig = std::mem::replace(&mut ctx.current_ret_sig, llvm_ret.clone());
    let saved_sret_ty = std::mem::replace(&mut ctx.current_sret_ty, meta.sret_ty.clone());
    let saved_expected_struct = ctx.expected_struct_type.take();

    let (result, body_ir) = ctx.with_isolated_buffer(|ctx| -> Result<(), CodegenError> {
        ctx.scope.enter_scope();
        let depth = ctx.scope.depth();
        if let Some(class_name) = class_name {
            ctx.scope.define(
                "this",
                SymbolEntry::new(format!("%struct.{class_name}*"), "%this".to_string(), depth),
            );
        }
        for p in &func.params {
            let param_ty = param_llvm_type(ctx, &p.type_annotation);
            if is_struct_value_type(param_ty.trim_end_matches('*')) && param_ty.ends_with('*') {
                // Struct-by-value params travel as a pointer already (spec
                // §4.5 "struct value <-> pointer"); `%arg.{name}` *is* the
                // storage, no separate alloca/store needed.
                ctx.scope.define(
                    &p.name,
                    SymbolEntry::new(
                        param_ty.trim_end_matches('*').to_string(),
                        format!("%arg.{}", p.name),
                        depth,
                    ),
                );
            } else {
                let slot = ctx.fresh_temp();
                ctx.emit(format!("{slot} = alloca {param_ty}"));
                ctx.emit(format!("store {param_ty} %arg.{}, {param_ty}* {slot}", p.name));
                ctx.scope.define(&p.name, SymbolEntry::new(param_ty, slot, depth));
            }
        }
        lower_block_statements(ctx, &func.body)?;
        ensure_terminator(ctx, &llvm_ret, meta.is_sret);
        ctx.scope.exit_scope();
        Ok(())
    });
    result?;

    ctx.current_ret_sig = saved_ret_sig;
    ctx.current_sret_ty = saved_sret_ty;
    ctx.expected_struct_type = saved_expected_struct;

    let text = format!(
        "define internal {llvm_ret} @{mangled_name}({}) {{\nentry:\n{}\n}}\n",
        param_decls.join(", "),
        body_ir
    );
    Ok((fn_ptr_type, text))
}

fn emit_global_binding(ctx: &mut LoweringContext, binding: &GlobalBinding) -> Result<(), CodegenError> {
    let ty = match &binding.type_annotation {
        Some(t) => ctx.types.map(t),
        None => infer_literal_type(&binding.name, &binding.value, &binding.position)?,
    };
    let init = literal_constant_text(ctx, &binding.name, &binding.value, &binding.position)?;
    let mangle_ctx = if binding.exported {
        MangleContext::Exported { source_path: ctx.current_source_path.clone() }
    } else {
        MangleContext::Plain
    };
    let mangled = ctx.mangler.mangle(&binding.name, &mangle_ctx);
    ctx.push_declaration_text(format!("@{mangled} = internal constant {ty} {init}"));
    ctx.scope.define_global(&binding.name, SymbolEntry::new(ty, format!("@{mangled}"), 0));
    Ok(())
}

fn infer_literal_type(name: &str, value: &Expr, position: &Position) -> Result<String, CodegenError> {
    match value {
        Expr::IntLiteral(..) => Ok("i64".to_string()),
        Expr::FloatLiteral(..) => Ok("f64".to_string()),
        Expr::BoolLiteral(..) => Ok("i1".to_string()),
        Expr::CharLiteral(..) => Ok("i8".to_string()),
        Expr::StringLiteral(..) => Ok("%struct.string*".to_string()),
        _ => Err(CodegenError::InvalidLiteralInitializer {
            name: name.to_string(),
            position: position.clone(),
        }),
    }
}

/// Global storage is always rendered as LLVM `constant` regardless of the
/// source `let`/`const` distinction (resolved Open Question, see
/// DESIGN.md): a freestanding program has no notion of mutating a global
/// behind a relocation, so both forms get the same immutable storage.
fn literal_constant_text(
    ctx: &mut LoweringContext,
    name: &str,
    value: &Expr,
    position: &Position,
) -> Result<String, CodegenError> {
    match value {
        Expr::IntLiteral(n, _) => Ok(n.to_string()),
        Expr::FloatLiteral(n, _) => Ok(format!("{n:?}")),
        Expr::BoolLiteral(b, _) => Ok(if *b { "1" } else { "0" }.to_string()),
        Expr::CharLiteral(c, _) => Ok(c.to_string()),
        Expr::NullLiteral(_) => Ok("null".to_string()),
        Expr::StringLiteral(lit, _) => Ok(ctx.strings.intern(lit).value),
        _ => Err(CodegenError::InvalidLiteralInitializer {
            name: name.to_string(),
            position: position.clone(),
        }),
    }
}

pub fn lower_stmt(ctx: &mut LoweringContext, stmt: &Stmt) -> Result<(), CodegenError> {
    match stmt {
        Stmt::Let(s) => lower_let(ctx, s),
        Stmt::Assignment(s) => lower_assignment(ctx, s),
        Stmt::If(s) => lower_if_stmt(ctx, s),
        Stmt::WhileLoop(s) => lower_while_stmt(ctx, s),
        Stmt::Return(value, position) => lower_return(ctx, value.as_ref(), position),
        Stmt::Expression(e) => {
            expr::lower_expr(ctx, e)?;
            Ok(())
        }
        Stmt::FunctionDecl(func) => lower_nested_function_decl(ctx, func),
        Stmt::StructDecl(decl) => ctx.declare_struct(decl),
        Stmt::ClassDecl(decl) => {
            ctx.declare_class(decl)?;
            declare_class_methods(ctx, decl)?;
            define_class_methods(ctx, decl)
        }
        Stmt::UsingStmt(_) => Ok(()),
    }
}

pub fn lower_block_statements(ctx: &mut LoweringContext, block: &Block) -> Result<(), CodegenError> {
    for stmt in &block.statements {
        lower_stmt(ctx, stmt)?;
    }
    Ok(())
}

fn lower_let(ctx: &mut LoweringContext, s: &LetStmt) -> Result<(), CodegenError> {
    let declared_ty = s.type_annotation.as_ref().map(|t| ctx.types.map(t));
    let saved_expected = ctx.expected_struct_type.take();
    if let Some(ty) = &declared_ty {
        if is_struct_value_type(ty) {
            ctx.expected_struct_type = Some(ty.clone());
        }
    }
    let value = match &s.value {
        Some(expr) => Some(expr::lower_expr(ctx, expr)?),
        None => None,
    };
    ctx.expected_struct_type = saved_expected;

    let ty = match (&declared_ty, &value) {
        (Some(t), _) => t.clone(),
        (None, Some(v)) => v.ty.clone(),
        (None, None) => {
            return Err(CodegenError::InvalidLiteralInitializer {
                name: s.name.clone(),
                position: s.position.clone(),
            })
        }
    };

    let depth = ctx.scope.depth();
    let slot = ctx.fresh_temp();
    ctx.emit(format!("{slot} = alloca {ty}"));
    match value {
        Some(v) if is_struct_value_type(&ty) => {
            // The initializer (an object literal or an SRET call result) is
            // always produced as a `%struct.T*` pointer, never a `%struct.T`
            // value — `coerce` normalizes to that pointer. Copy the bytes in
            // rather than `store`ing the pointer under the value's own type.
            let coerced = expr::coerce(ctx, v, &format!("{ty}*"), &s.position)?;
            let size = struct_byte_size(ctx, &ty);
            ctx.emit(format!(
                "call void @__memcpy_inline(i8* bitcast ({ty}* {slot} to i8*), i8* bitcast ({ty}* {} to i8*), i64 {size})",
                coerced.value
            ));
        }
        Some(v) => {
            let coerced = expr::coerce(ctx, v, &ty, &s.position)?;
            ctx.emit(format!("store {ty} {}, {ty}* {slot}", coerced.value));
        }
        None => {
            ctx.emit(format!("store {ty} zeroinitializer, {ty}* {slot}"));
        }
    }
    ctx.scope.define(&s.name, SymbolEntry::new(ty, slot, depth));
    Ok(())
}

fn lower_assignment(ctx: &mut LoweringContext, s: &AssignmentStmt) -> Result<(), CodegenError> {
    let lvalue = expr::resolve_lvalue(ctx, &s.target)?;
    let value = expr::lower_expr(ctx, &s.value)?;
    if is_struct_value_type(&lvalue.pointee_ty) {
        // Same shape as a struct-value `let`: the source is already a
        // `%struct.T*` pointer (its own alloca, or an SRET call result), so
        // copy its bytes into the lvalue's slot rather than `store`ing that
        // pointer under the bare struct type.
        let coerced = expr::coerce(ctx, value, &format!("{}*", lvalue.pointee_ty), &s.position)?;
        let size = struct_byte_size(ctx, &lvalue.pointee_ty);
        ctx.emit(format!(
            "call void @__memcpy_inline(i8* bitcast ({}* {} to i8*), i8* bitcast ({}* {} to i8*), i64 {size})",
            lvalue.pointee_ty, lvalue.ptr, lvalue.pointee_ty, coerced.value
        ));
        return Ok(());
    }
    let coerced = expr::coerce(ctx, value, &lvalue.pointee_ty, &s.position)?;
    ctx.emit(format!(
        "store {} {}, {}* {}",
        lvalue.pointee_ty, coerced.value, lvalue.pointee_ty, lvalue.ptr
    ));
    Ok(())
}

fn lower_if_stmt(ctx: &mut LoweringContext, s: &IfStmt) -> Result<(), CodegenError> {
    let cond = expr::lower_expr(ctx, &s.condition)?;
    let cond = expr::coerce(ctx, cond, "i1", &s.position)?;
    let then_label = ctx.fresh_label("if.then");
    let else_label = ctx.fresh_label("if.else");
    let end_label = ctx.fresh_label("if.end");
    let has_else = s.else_block.is_some();
    let else_target = if has_else { else_label.clone() } else { end_label.clone() };
    ctx.emit(format!("br i1 {}, label %{then_label}, label %{else_target}", cond.value));

    ctx.emit(format!("{then_label}:"));
    ctx.scope.enter_scope();
    lower_block_statements(ctx, &s.then_block)?;
    ctx.scope.exit_scope();
    branch_if_missing_terminator(ctx, &end_label);

    if let Some(else_block) = &s.else_block {
        ctx.emit(format!("{else_label}:"));
        ctx.scope.enter_scope();
        lower_block_statements(ctx, else_block)?;
        ctx.scope.exit_scope();
        branch_if_missing_terminator(ctx, &end_label);
    }

    ctx.emit(format!("{end_label}:"));
    Ok(())
}

fn lower_while_stmt(ctx: &mut LoweringContext, s: &WhileStmt) -> Result<(), CodegenError> {
    let cond_label = ctx.fresh_label("while.cond");
    let body_label = ctx.fresh_label("while.body");
    let end_label = ctx.fresh_label("while.end");

    branch_if_missing_terminator(ctx, &cond_label);
    ctx.emit(format!("{cond_label}:"));
    let cond = expr::lower_expr(ctx, &s.condition)?;
    let cond = expr::coerce(ctx, cond, "i1", &s.position)?;
    ctx.emit(format!("br i1 {}, label %{body_label}, label %{end_label}", cond.value));

    ctx.emit(format!("{body_label}:"));
    ctx.scope.enter_scope();
    lower_block_statements(ctx, &s.body)?;
    ctx.scope.exit_scope();
    branch_if_missing_terminator(ctx, &cond_label);

    ctx.emit(format!("{end_label}:"));
    Ok(())
}

fn lower_return(
    ctx: &mut LoweringContext,
    value: Option<&Expr>,
    position: &Position,
) -> Result<(), CodegenError> {
    match (value, ctx.current_sret_ty.clone()) {
        (Some(e), Some(sret_ty)) => {
            let evaluated = expr::lower_expr(ctx, e)?;
            let coerced = expr::coerce(ctx, evaluated, &sret_ty, position)?;
            let size = struct_byte_size(ctx, &sret_ty);
            ctx.emit(format!(
                "call void @__memcpy_inline(i8* bitcast ({sret_ty}* %agg.result to i8*), i8* bitcast ({sret_ty}* {} to i8*), i64 {size})",
                coerced.value
            ));
            ctx.emit("ret void");
            Ok(())
        }
        (Some(e), None) => {
            let evaluated = expr::lower_expr(ctx, e)?;
            let ret_ty = ctx.current_ret_sig.clone();
            let coerced = expr::coerce(ctx, evaluated, &ret_ty, position)?;
            ctx.emit(format!("ret {ret_ty} {}", coerced.value));
            Ok(())
        }
        (None, _) => {
            ctx.emit("ret void");
            Ok(())
        }
    }
}

/// True if the current function buffer's last line is not itself a
/// terminator — used both to auto-insert a function's implicit trailing
/// `ret` and to insert the fallthrough `br` out of an `if`/`while` block.
pub(crate) fn needs_terminator(ctx: &LoweringContext) -> bool {
    match ctx.last_emitted_line() {
        Some(line) => {
            let trimmed = line.trim_start();
            !(trimmed.starts_with("ret ")
                || trimmed == "ret void"
                || trimmed.starts_with("br ")
                || trimmed == "unreachable")
        }
        None => true,
    }
}

pub(crate) fn branch_if_missing_terminator(ctx: &mut LoweringContext, label: &str) {
    if needs_terminator(ctx) {
        ctx.emit(format!("br label %{label}"));
    }
}

/// Invariant 6 / §8 boundary behavior: a function whose body falls off the
/// end without a terminator gets `ret void` if it's declared `void` (or
/// SRET, which is `void` at the LLVM level), `unreachable` otherwise — the
/// source-level type checker guarantees a non-void function body always
/// returns on every path, so falling through means dead code, not a missing
/// value to synthesize.
pub(crate) fn ensure_terminator(ctx: &mut LoweringContext, ret_ty: &str, is_sret: bool) {
    if !needs_terminator(ctx) {
        return;
    }
    if is_sret || ret_ty == "void" {
        ctx.emit("ret void");
    } else {
        ctx.emit("unreachable");
    }
}
