//! ExpressionLowerer: literal/identifier/operator/call/member lowering.
//!
//! Grounded on `why_lib`'s expression-typed-AST walk for the shape of the
//! visitor (one function per node kind, returning a uniform result type),
//! re-targeted to emit LLVM IR text through [`IRValue`] instead of building
//! a typed tree. The struct-value-travels-by-pointer convention and the
//! `function_meta` SRET side table are this engine's own resolutions of
//! ambiguities left open by the source material (see DESIGN.md).

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Param, PrefixOp, TypeAnnotation};
use crate::closure::ClosureAnalyzer;
use crate::error::{CodegenError, Position};
use crate::mangle::MangleContext;
use crate::modules::{ClassEntry, MemberInfo};
use crate::orchestrator::LoweringContext;
use crate::scope::SymbolEntry;
use crate::types::TypeMapper;
use crate::value::{is_closure_shape, IRValue};

use super::stmt;

/// A resolved assignment/address-of target: the address to read/write and
/// the LLVM type stored there.
pub struct LValue {
    pub ptr: String,
    pub pointee_ty: String,
}

/// True for the bare (non-pointer) struct type TypeMapper produces for a
/// named user type — the form used for `alloca`s and SRET returns. Every
/// *value* of this shape that circulates through the engine is still
/// represented as a pointer (`IRValue.ty` ending in `*`); only declared
/// storage slots and return types use the bare form.
pub(crate) fn is_struct_value_type(ty: &str) -> bool {
    ty.starts_with("%struct.") && !ty.ends_with('*')
}

/// A parameter/argument's effective LLVM type: struct values travel by
/// pointer everywhere except as a bare `alloca`/return type.
pub(crate) fn param_llvm_type(ctx: &LoweringContext, annotation: &TypeAnnotation) -> String {
    let ty = ctx.types.map(annotation);
    if is_struct_value_type(&ty) {
        format!("{ty}*")
    } else {
        ty
    }
}

pub(crate) fn struct_byte_size(ctx: &LoweringContext, struct_ty: &str) -> u32 {
    let name = struct_ty.trim_start_matches("%struct.");
    match ctx.classes.get(name) {
        Some(entry) => entry.field_llvm_types().iter().fold(0u32, |offset, field_ty| {
            let align = TypeMapper::alignment(field_ty);
            let aligned_offset = (offset + align - 1) / align * align;
            aligned_offset + TypeMapper::size_of(field_ty)
        }),
        None => 8,
    }
}

fn is_numeric_type(ty: &str) -> bool {
    matches!(ty, "i1" | "i8" | "i16" | "i32" | "i64" | "f32" | "f64")
}

pub fn lower_expr(ctx: &mut LoweringContext, expr: &Expr) -> Result<IRValue, CodegenError> {
    match expr {
        Expr::IntLiteral(n, _) => Ok(IRValue::new(n.to_string(), "i64")),
        Expr::FloatLiteral(n, _) => Ok(IRValue::new(format!("{n:?}"), "f64")),
        Expr::BoolLiteral(b, _) => Ok(IRValue::new(if *b { "1" } else { "0" }, "i1")),
        Expr::CharLiteral(c, _) => Ok(IRValue::new(c.to_string(), "i8")),
        Expr::StringLiteral(lit, _) => Ok(ctx.strings.intern(lit)),
        Expr::NullLiteral(_) => Ok(IRValue::null()),
        Expr::Id(name, position) => lower_identifier(ctx, name, position),
        Expr::Binary { op, left, right, position } => lower_binary(ctx, *op, left, right, position),
        Expr::Prefix { op, operand, position } => lower_prefix(ctx, *op, operand, position),
        Expr::AddressOf(inner, position) => lower_address_of(ctx, inner, position),
        Expr::Dereference(inner, position) => lower_dereference(ctx, inner, position),
        Expr::Call { callee, args, position } => lower_call(ctx, callee, args, position),
        Expr::Get { receiver, member, position } => lower_get(ctx, receiver, member, position),
        Expr::As { operand, target_type, position } => lower_cast(ctx, operand, target_type, position),
        Expr::New { class_name, args, position } => lower_new(ctx, class_name, args, position),
        Expr::Delete(inner, position) => lower_delete(ctx, inner, position),
        Expr::ObjectLiteral { type_name, fields, position } => {
            lower_object_literal(ctx, type_name, fields, position)
        }
        Expr::FunctionLiteral { params, return_type, body, position } => {
            lower_function_literal(ctx, params, return_type, body, position)
        }
        Expr::Block(block, _) => {
            ctx.scope.enter_scope();
            let result = stmt::lower_block_statements(ctx, block);
            ctx.scope.exit_scope();
            result?;
            Ok(IRValue::new("void", "void"))
        }
        Expr::If { condition, then_block, else_block, position } => {
            lower_if_expr(ctx, condition, then_block, else_block.as_ref(), position)
        }
        Expr::UnsafeBlock(block, _) => {
            ctx.unsafe_depth += 1;
            let result = (|| -> Result<IRValue, CodegenError> {
                ctx.scope.enter_scope();
                let r = stmt::lower_block_statements(ctx, block);
                ctx.scope.exit_scope();
                r?;
                Ok(IRValue::new("void", "void"))
            })();
            ctx.unsafe_depth -= 1;
            result
        }
        Expr::Parens(inner, _) => lower_expr(ctx, inner),
    }
}

fn lower_identifier(ctx: &mut LoweringContext, name: &str, position: &Position) -> Result<IRValue, CodegenError> {
    if let Some((field_index, field_ty)) = ctx.captured_vars.get(name).cloned() {
        let env_struct_ty = ctx.env_struct_ty.clone().expect("captured var implies a closure env");
        let env_ptr = ctx.env_ptr.clone().expect("captured var implies a closure env");
        let field_slot = ctx.fresh_temp();
        ctx.emit(format!(
            "{field_slot} = getelementptr {env_struct_ty}, {env_struct_ty}* {env_ptr}, i32 0, i32 {field_index}"
        ));
        let original_ptr = ctx.fresh_temp();
        ctx.emit(format!("{original_ptr} = load {field_ty}, {field_ty}* {field_slot}"));
        let pointee_ty = field_ty.trim_end_matches('*').to_string();
        if is_struct_value_type(&pointee_ty) {
            return Ok(IRValue::new(original_ptr, format!("{pointee_ty}*")));
        }
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = load {pointee_ty}, {pointee_ty}* {original_ptr}"));
        return Ok(IRValue::new(temp, pointee_ty).with_address(original_ptr));
    }

    let entry = ctx
        .scope
        .lookup(name)
        .cloned()
        .ok_or_else(|| CodegenError::UndefinedIdentifier { name: name.to_string(), position: position.clone() })?;

    if let Some(module) = ctx.module_objects.values().find(|m| m.global_name == entry.ptr) {
        return Ok(IRValue::new(module.global_name.clone(), "module")
            .with_ptr(module.global_name.clone(), format!("{}*", module.struct_name)));
    }

    if entry.ptr.starts_with('@') && entry.llvm_type.contains('(') && entry.llvm_type.ends_with(")*") {
        let symbol = entry.ptr.trim_start_matches('@').to_string();
        return Ok(IRValue::new(entry.ptr.clone(), entry.llvm_type.clone()).with_called_symbol(symbol));
    }

    if is_struct_value_type(&entry.llvm_type) {
        return Ok(IRValue::new(entry.ptr.clone(), format!("{}*", entry.llvm_type)));
    }

    let temp = ctx.fresh_temp();
    ctx.emit(format!("{temp} = load {}, {}* {}", entry.llvm_type, entry.llvm_type, entry.ptr));
    Ok(IRValue::new(temp, entry.llvm_type).with_address(entry.ptr))
}

/// Resolves an expression to the address backing it and the LLVM type
/// stored there — used by assignment, `addrof`, and struct-field access.
pub fn resolve_lvalue(ctx: &mut LoweringContext, expr: &Expr) -> Result<LValue, CodegenError> {
    match expr {
        Expr::Id(name, position) => {
            if let Some((field_index, field_ty)) = ctx.captured_vars.get(name).cloned() {
                let env_struct_ty = ctx.env_struct_ty.clone().expect("captured var implies a closure env");
                let env_ptr = ctx.env_ptr.clone().expect("captured var implies a closure env");
                let field_slot = ctx.fresh_temp();
                ctx.emit(format!(
                    "{field_slot} = getelementptr {env_struct_ty}, {env_struct_ty}* {env_ptr}, i32 0, i32 {field_index}"
                ));
                let original_ptr = ctx.fresh_temp();
                ctx.emit(format!("{original_ptr} = load {field_ty}, {field_ty}* {field_slot}"));
                return Ok(LValue { ptr: original_ptr, pointee_ty: field_ty.trim_end_matches('*').to_string() });
            }
            let entry = ctx.scope.lookup(name).cloned().ok_or_else(|| {
                CodegenError::UndefinedIdentifier { name: name.clone(), position: position.clone() }
            })?;
            Ok(LValue { ptr: entry.ptr, pointee_ty: entry.llvm_type })
        }
        Expr::Get { receiver, member, position } => struct_field_lvalue(ctx, receiver, member, position),
        Expr::Dereference(inner, position) => {
            let value = lower_expr(ctx, inner)?;
            if !value.ty.ends_with('*') {
                return Err(CodegenError::TypeMismatch {
                    expected: "pointer".to_string(),
                    found: value.ty.clone(),
                    position: position.clone(),
                });
            }
            Ok(LValue { ptr: value.value, pointee_ty: value.ty.trim_end_matches('*').to_string() })
        }
        other => Err(CodegenError::InvalidAssignmentTarget { position: other.position().clone() }),
    }
}

fn struct_field_lvalue(
    ctx: &mut LoweringContext,
    receiver: &Expr,
    member: &str,
    position: &Position,
) -> Result<LValue, CodegenError> {
    let (struct_ptr, struct_ty) = match resolve_lvalue(ctx, receiver) {
        Ok(lv) if is_struct_value_type(&lv.pointee_ty) => (lv.ptr, lv.pointee_ty),
        Ok(lv) if lv.pointee_ty.ends_with('*') => {
            let loaded = ctx.fresh_temp();
            ctx.emit(format!("{loaded} = load {}, {}* {}", lv.pointee_ty, lv.pointee_ty, lv.ptr));
            (loaded, lv.pointee_ty.trim_end_matches('*').to_string())
        }
        Ok(lv) => {
            return Err(CodegenError::TypeMismatch {
                expected: "struct or pointer".to_string(),
                found: lv.pointee_ty,
                position: position.clone(),
            })
        }
        Err(_) => {
            let value = lower_expr(ctx, receiver)?;
            if !value.ty.ends_with('*') {
                return Err(CodegenError::TypeMismatch {
                    expected: "struct pointer".to_string(),
                    found: value.ty,
                    position: position.clone(),
                });
            }
            (value.value, value.ty.trim_end_matches('*').to_string())
        }
    };

    let class_name = struct_ty.trim_start_matches("%struct.").to_string();
    let entry = ctx
        .classes
        .get(&class_name)
        .cloned()
        .ok_or_else(|| CodegenError::UnknownClass { name: class_name.clone(), position: position.clone() })?;
    let member_info = entry.members.get(member).cloned().ok_or_else(|| CodegenError::UnknownMember {
        class: class_name.clone(),
        member: member.to_string(),
        position: position.clone(),
    })?;

    let field_ptr = ctx.fresh_temp();
    ctx.emit(format!(
        "{field_ptr} = getelementptr {struct_ty}, {struct_ty}* {struct_ptr}, i32 0, i32 {}",
        member_info.index
    ));
    Ok(LValue { ptr: field_ptr, pointee_ty: member_info.llvm_type })
}

fn lower_address_of(ctx: &mut LoweringContext, target: &Expr, _position: &Position) -> Result<IRValue, CodegenError> {
    let lvalue = resolve_lvalue(ctx, target)?;
    let as_int = ctx.fresh_temp();
    ctx.emit(format!("{as_int} = ptrtoint {}* {} to i64", lvalue.pointee_ty, lvalue.ptr));
    Ok(IRValue::new(as_int, "i64").with_ptr(lvalue.ptr, format!("{}*", lvalue.pointee_ty)))
}

fn lower_dereference(ctx: &mut LoweringContext, inner: &Expr, position: &Position) -> Result<IRValue, CodegenError> {
    let value = lower_expr(ctx, inner)?;
    if let (Some(ptr), Some(ptr_ty)) = (value.ptr.clone(), value.ptr_type.clone()) {
        let target_ty = ptr_ty.trim_end_matches('*').to_string();
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = load {target_ty}, {target_ty}* {ptr}"));
        return Ok(IRValue::new(temp, target_ty));
    }
    if !value.ty.ends_with('*') {
        return Err(CodegenError::TypeMismatch {
            expected: "pointer".to_string(),
            found: value.ty.clone(),
            position: position.clone(),
        });
    }
    let pointee_ty = value.ty.trim_end_matches('*').to_string();
    let temp = ctx.fresh_temp();
    ctx.emit(format!("{temp} = load {pointee_ty}, {pointee_ty}* {}", value.value));
    Ok(IRValue::new(temp, pointee_ty))
}

fn wider_numeric_type(a: &str, b: &str) -> String {
    if a == b {
        return a.to_string();
    }
    let rank = |t: &str| match t {
        "i1" => 0,
        "i8" => 1,
        "i16" => 2,
        "i32" => 3,
        "i64" => 4,
        "f32" => 5,
        "f64" => 6,
        _ => 4,
    };
    if rank(a) >= rank(b) {
        a.to_string()
    } else {
        b.to_string()
    }
}

fn lower_binary(
    ctx: &mut LoweringContext,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    position: &Position,
) -> Result<IRValue, CodegenError> {
    let lhs = lower_expr(ctx, left)?;
    let rhs = lower_expr(ctx, right)?;

    if matches!(op, BinaryOp::Add) && (lhs.ty == "%struct.string*" || rhs.ty == "%struct.string*") {
        let lhs = coerce(ctx, lhs, "%struct.string*", position)?;
        let rhs = coerce(ctx, rhs, "%struct.string*", position)?;
        return string_concat(ctx, &lhs, &rhs);
    }

    let common_ty = wider_numeric_type(&lhs.ty, &rhs.ty);
    let lhs = coerce(ctx, lhs, &common_ty, position)?;
    let rhs = coerce(ctx, rhs, &common_ty, position)?;
    let is_float = common_ty.starts_with('f');

    let (result_ty, instr) = match op {
        BinaryOp::Add => (common_ty.clone(), if is_float { "fadd" } else { "add" }),
        BinaryOp::Sub => (common_ty.clone(), if is_float { "fsub" } else { "sub" }),
        BinaryOp::Mul => (common_ty.clone(), if is_float { "fmul" } else { "mul" }),
        BinaryOp::Div => (common_ty.clone(), if is_float { "fdiv" } else { "sdiv" }),
        BinaryOp::Mod => (common_ty.clone(), if is_float { "frem" } else { "srem" }),
        BinaryOp::BitAnd => (common_ty.clone(), "and"),
        BinaryOp::BitOr => (common_ty.clone(), "or"),
        BinaryOp::BitXor => (common_ty.clone(), "xor"),
        BinaryOp::Shl => (common_ty.clone(), "shl"),
        BinaryOp::Shr => (common_ty.clone(), "ashr"),
        BinaryOp::Eq => ("i1".to_string(), if is_float { "fcmp oeq" } else { "icmp eq" }),
        BinaryOp::Ne => ("i1".to_string(), if is_float { "fcmp one" } else { "icmp ne" }),
        BinaryOp::Lt => ("i1".to_string(), if is_float { "fcmp olt" } else { "icmp slt" }),
        BinaryOp::Le => ("i1".to_string(), if is_float { "fcmp ole" } else { "icmp sle" }),
        BinaryOp::Gt => ("i1".to_string(), if is_float { "fcmp ogt" } else { "icmp sgt" }),
        BinaryOp::Ge => ("i1".to_string(), if is_float { "fcmp oge" } else { "icmp sge" }),
    };

    let temp = ctx.fresh_temp();
    ctx.emit(format!("{temp} = {instr} {common_ty} {}, {}", lhs.value, rhs.value));
    Ok(IRValue::new(temp, result_ty))
}

fn lower_prefix(ctx: &mut LoweringContext, op: PrefixOp, operand: &Expr, position: &Position) -> Result<IRValue, CodegenError> {
    let value = lower_expr(ctx, operand)?;
    match op {
        PrefixOp::Neg => {
            let temp = ctx.fresh_temp();
            if value.ty.starts_with('f') {
                ctx.emit(format!("{temp} = fneg {} {}", value.ty, value.value));
            } else {
                ctx.emit(format!("{temp} = sub {} 0, {}", value.ty, value.value));
            }
            let ty = value.ty;
            Ok(IRValue::new(temp, ty))
        }
        PrefixOp::Not => {
            let coerced = coerce(ctx, value, "i1", position)?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = xor i1 {}, 1", coerced.value));
            Ok(IRValue::new(temp, "i1"))
        }
    }
}

fn lower_if_expr(
    ctx: &mut LoweringContext,
    condition: &Expr,
    then_block: &crate::ast::Block,
    else_block: Option<&crate::ast::Block>,
    position: &Position,
) -> Result<IRValue, CodegenError> {
    let cond = lower_expr(ctx, condition)?;
    let cond = coerce(ctx, cond, "i1", position)?;
    let then_label = ctx.fresh_label("ifexpr.then");
    let else_label = ctx.fresh_label("ifexpr.else");
    let end_label = ctx.fresh_label("ifexpr.end");
    let else_target = if else_block.is_some() { else_label.clone() } else { end_label.clone() };
    ctx.emit(format!("br i1 {}, label %{then_label}, label %{else_target}", cond.value));

    ctx.emit(format!("{then_label}:"));
    ctx.scope.enter_scope();
    stmt::lower_block_statements(ctx, then_block)?;
    ctx.scope.exit_scope();
    stmt::branch_if_missing_terminator(ctx, &end_label);

    if let Some(block) = else_block {
        ctx.emit(format!("{else_label}:"));
        ctx.scope.enter_scope();
        stmt::lower_block_statements(ctx, block)?;
        ctx.scope.exit_scope();
        stmt::branch_if_missing_terminator(ctx, &end_label);
    }

    ctx.emit(format!("{end_label}:"));
    Ok(IRValue::new("void", "void"))
}

/// Argument/assignment coercion: struct value <-> pointer normalization,
/// numeric conversions, pointer bitcasts, implicit `toString` for string
/// targets, and implicit reference passing for an `addrof`-produced `i64`
/// handed where its pointee type is expected.
pub fn coerce(ctx: &mut LoweringContext, value: IRValue, target_ty: &str, position: &Position) -> Result<IRValue, CodegenError> {
    if value.ty == target_ty {
        return Ok(value);
    }
    if is_struct_value_type(target_ty) {
        return coerce(ctx, value, &format!("{target_ty}*"), position);
    }
    if target_ty == "%struct.string*" && value.ty != "%struct.string*" {
        return lower_to_string_call(ctx, value);
    }
    if is_numeric_type(&value.ty) && is_numeric_type(target_ty) {
        return Ok(coerce_numeric(ctx, value, target_ty));
    }
    if value.ty.ends_with('*') && target_ty.ends_with('*') {
        // A closure object's second field is its environment pointer; a
        // plain `bitcast` between a closure shape and anything else (a bare
        // function pointer, or a closure of a different signature)
        // reinterprets the struct layout rather than converting it, silently
        // dropping or misreading the env half, or the real function's
        // argument list. Neither side of this branch can be a closure shape
        // unless both are and match exactly (caught by the `==` check
        // above) — the caller needs to fix the declared type instead.
        if is_closure_shape(&value.ty) || is_closure_shape(target_ty) {
            return Err(CodegenError::TypeMismatch {
                expected: target_ty.to_string(),
                found: value.ty,
                position: position.clone(),
            });
        }
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = bitcast {} {} to {target_ty}", value.ty, value.value));
        return Ok(IRValue::new(temp, target_ty.to_string()));
    }
    if value.ty == "i64" {
        if let (Some(ptr), Some(ptr_ty)) = (&value.ptr, &value.ptr_type) {
            if ptr_ty.trim_end_matches('*') == target_ty {
                let temp = ctx.fresh_temp();
                ctx.emit(format!("{temp} = load {target_ty}, {target_ty}* {ptr}"));
                return Ok(IRValue::new(temp, target_ty.to_string()));
            }
        }
    }
    Err(CodegenError::TypeMismatch { expected: target_ty.to_string(), found: value.ty, position: position.clone() })
}

fn coerce_numeric(ctx: &mut LoweringContext, value: IRValue, target_ty: &str) -> IRValue {
    let src = value.ty.clone();
    if src == target_ty {
        return value;
    }
    let src_is_float = src.starts_with('f');
    let dst_is_float = target_ty.starts_with('f');
    let temp = ctx.fresh_temp();
    let op = if src_is_float && dst_is_float {
        if bit_width(target_ty) > bit_width(&src) { "fpext" } else { "fptrunc" }
    } else if src_is_float && !dst_is_float {
        "fptosi"
    } else if !src_is_float && dst_is_float {
        "sitofp"
    } else if bit_width(target_ty) > bit_width(&src) {
        "sext"
    } else if bit_width(target_ty) < bit_width(&src) {
        "trunc"
    } else {
        "bitcast"
    };
    ctx.emit(format!("{temp} = {op} {src} {} to {target_ty}", value.value));
    IRValue::new(temp, target_ty.to_string())
}

fn bit_width(ty: &str) -> u32 {
    match ty {
        "i1" => 1,
        "i8" => 8,
        "i16" => 16,
        "i32" => 32,
        "i64" => 64,
        "f32" => 32,
        "f64" => 64,
        _ => 64,
    }
}

/// Converts any `IRValue` an orchestrator collaborator needs as a plain
/// `i64` syscall operand for [`crate::platform::PlatformPort::emit_syscall`].
pub fn as_i64_operand(ctx: &mut LoweringContext, v: &IRValue) -> String {
    if v.ty == "i64" {
        return v.value.clone();
    }
    if v.ty.ends_with('*') {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = ptrtoint {} {} to i64", v.ty, v.value));
        return temp;
    }
    coerce_numeric(ctx, v.clone(), "i64").value
}

fn lower_to_string_call(ctx: &mut LoweringContext, value: IRValue) -> Result<IRValue, CodegenError> {
    let as_int = if value.ty == "i64" {
        value.value.clone()
    } else if is_numeric_type(&value.ty) {
        coerce_numeric(ctx, value, "i64").value
    } else {
        value.value.clone()
    };
    let temp = ctx.fresh_temp();
    ctx.emit(format!("{temp} = call %struct.string* @yulang_to_string(i64 {as_int})"));
    Ok(IRValue::new(temp, "%struct.string*"))
}

fn string_concat(ctx: &mut LoweringContext, lhs: &IRValue, rhs: &IRValue) -> Result<IRValue, CodegenError> {
    let lptr_f = ctx.fresh_temp();
    ctx.emit(format!("{lptr_f} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 0", lhs.value));
    let lptr = ctx.fresh_temp();
    ctx.emit(format!("{lptr} = load i8*, i8** {lptr_f}"));
    let llen_f = ctx.fresh_temp();
    ctx.emit(format!("{llen_f} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 1", lhs.value));
    let llen = ctx.fresh_temp();
    ctx.emit(format!("{llen} = load i64, i64* {llen_f}"));

    let rptr_f = ctx.fresh_temp();
    ctx.emit(format!("{rptr_f} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 0", rhs.value));
    let rptr = ctx.fresh_temp();
    ctx.emit(format!("{rptr} = load i8*, i8** {rptr_f}"));
    let rlen_f = ctx.fresh_temp();
    ctx.emit(format!("{rlen_f} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 1", rhs.value));
    let rlen = ctx.fresh_temp();
    ctx.emit(format!("{rlen} = load i64, i64* {rlen_f}"));

    let combined_len = ctx.fresh_temp();
    ctx.emit(format!("{combined_len} = add i64 {llen}, {rlen}"));
    // Trailing NUL only on concatenation (resolved Open Question, see
    // DESIGN.md): base literals never carry one.
    let total_len = ctx.fresh_temp();
    ctx.emit(format!("{total_len} = add i64 {combined_len}, 1"));

    let buf = ctx.fresh_temp();
    ctx.emit(format!("{buf} = call i8* @yulang_malloc(i64 {total_len})"));
    ctx.emit(format!("call void @__memcpy_inline(i8* {buf}, i8* {lptr}, i64 {llen})"));
    let right_dst = ctx.fresh_temp();
    ctx.emit(format!("{right_dst} = getelementptr i8, i8* {buf}, i64 {llen}"));
    ctx.emit(format!("call void @__memcpy_inline(i8* {right_dst}, i8* {rptr}, i64 {rlen})"));
    let nul_dst = ctx.fresh_temp();
    ctx.emit(format!("{nul_dst} = getelementptr i8, i8* {buf}, i64 {combined_len}"));
    ctx.emit(format!("store i8 0, i8* {nul_dst}"));

    let result_slot = ctx.fresh_temp();
    ctx.emit(format!("{result_slot} = alloca %struct.string"));
    let ptr_field = ctx.fresh_temp();
    ctx.emit(format!("{ptr_field} = getelementptr %struct.string, %struct.string* {result_slot}, i32 0, i32 0"));
    ctx.emit(format!("store i8* {buf}, i8** {ptr_field}"));
    let len_field = ctx.fresh_temp();
    ctx.emit(format!("{len_field} = getelementptr %struct.string, %struct.string* {result_slot}, i32 0, i32 1"));
    ctx.emit(format!("store i64 {combined_len}, i64* {len_field}"));

    Ok(IRValue::new(result_slot, "%struct.string*"))
}

fn expect_arity(name: &str, args: &[Expr], expected: usize, position: &Position) -> Result<(), CodegenError> {
    if args.len() != expected {
        return Err(CodegenError::Arity { name: name.to_string(), expected, found: args.len(), position: position.clone() });
    }
    Ok(())
}

/// Predefined builtins available in any context.
fn try_builtin(ctx: &mut LoweringContext, name: &str, args: &[Expr], position: &Position) -> Result<Option<IRValue>, CodegenError> {
    match name {
        "objof" => {
            expect_arity(name, args, 1, position)?;
            let lvalue = resolve_lvalue(ctx, &args[0])?;
            Ok(Some(IRValue::new(lvalue.ptr, format!("{}*", lvalue.pointee_ty))))
        }
        "toString" => {
            expect_arity(name, args, 1, position)?;
            let value = lower_expr(ctx, &args[0])?;
            Ok(Some(lower_to_string_call(ctx, value)?))
        }
        "toInt" => {
            expect_arity(name, args, 1, position)?;
            let value = lower_expr(ctx, &args[0])?;
            let coerced = coerce(ctx, value, "%struct.string*", position)?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = call i64 @yulang_to_int(%struct.string* {})", coerced.value));
            Ok(Some(IRValue::new(temp, "i64")))
        }
        "syscall" => {
            if args.is_empty() {
                return Err(CodegenError::Arity { name: name.to_string(), expected: 1, found: 0, position: position.clone() });
            }
            let num = lower_expr(ctx, &args[0])?;
            let num = coerce(ctx, num, "i64", position)?;
            let mut rest = Vec::new();
            for a in &args[1..] {
                let v = lower_expr(ctx, a)?;
                rest.push(coerce(ctx, v, "i64", position)?);
            }
            let platform = ctx.platform;
            Ok(Some(platform.emit_syscall(ctx, &num, &rest)))
        }
        "_builtin_alloc" => {
            expect_arity(name, args, 1, position)?;
            let size = lower_expr(ctx, &args[0])?;
            let size = coerce(ctx, size, "i64", position)?;
            let platform = ctx.platform;
            Ok(Some(platform.emit_allocate(ctx, &size)))
        }
        "_builtin_string_to_ptr" => {
            expect_arity(name, args, 1, position)?;
            let s = lower_expr(ctx, &args[0])?;
            let s = coerce(ctx, s, "%struct.string*", position)?;
            let field_ptr = ctx.fresh_temp();
            ctx.emit(format!("{field_ptr} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 0", s.value));
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = load i8*, i8** {field_ptr}"));
            Ok(Some(IRValue::new(temp, "i8*")))
        }
        "_builtin_string_get_len" => {
            expect_arity(name, args, 1, position)?;
            let s = lower_expr(ctx, &args[0])?;
            let s = coerce(ctx, s, "%struct.string*", position)?;
            let field_ptr = ctx.fresh_temp();
            ctx.emit(format!("{field_ptr} = getelementptr %struct.string, %struct.string* {}, i32 0, i32 1", s.value));
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = load i64, i64* {field_ptr}"));
            Ok(Some(IRValue::new(temp, "i64")))
        }
        "_builtin_create_string" => {
            expect_arity(name, args, 2, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let ptr = coerce(ctx, ptr, "i8*", position)?;
            let len = lower_expr(ctx, &args[1])?;
            let len = coerce(ctx, len, "i64", position)?;
            Ok(Some(build_string_struct(ctx, &ptr, &len)))
        }
        "_builtin_string_concat" => {
            expect_arity(name, args, 2, position)?;
            let lhs = lower_expr(ctx, &args[0])?;
            let rhs = lower_expr(ctx, &args[1])?;
            let lhs = coerce(ctx, lhs, "%struct.string*", position)?;
            let rhs = coerce(ctx, rhs, "%struct.string*", position)?;
            Ok(Some(string_concat(ctx, &lhs, &rhs)?))
        }
        "alloca" => {
            expect_arity(name, args, 1, position)?;
            let size = lower_expr(ctx, &args[0])?;
            let size = coerce(ctx, size, "i64", position)?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = alloca i8, i64 {}", size.value));
            Ok(Some(IRValue::new(temp, "i8*")))
        }
        _ => Ok(None),
    }
}

/// Builtins only reachable from inside an `unsafe { }` block.
fn try_unsafe_builtin(ctx: &mut LoweringContext, name: &str, args: &[Expr], position: &Position) -> Result<Option<IRValue>, CodegenError> {
    match name {
        "ptr_add" => {
            expect_arity(name, args, 2, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let ptr = coerce(ctx, ptr, "i8*", position)?;
            let offset = lower_expr(ctx, &args[1])?;
            let offset = coerce(ctx, offset, "i64", position)?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = getelementptr i8, i8* {}, i64 {}", ptr.value, offset.value));
            Ok(Some(IRValue::new(temp, "i8*")))
        }
        "mem_read" => {
            expect_arity(name, args, 1, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let casted = ctx.fresh_temp();
            ctx.emit(format!("{casted} = bitcast {} {} to i64*", ptr.ty, ptr.value));
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = load i64, i64* {casted}"));
            Ok(Some(IRValue::new(temp, "i64")))
        }
        "mem_write" => {
            expect_arity(name, args, 2, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let value = lower_expr(ctx, &args[1])?;
            let value = coerce(ctx, value, "i64", position)?;
            let casted = ctx.fresh_temp();
            ctx.emit(format!("{casted} = bitcast {} {} to i64*", ptr.ty, ptr.value));
            ctx.emit(format!("store i64 {}, i64* {casted}", value.value));
            Ok(Some(IRValue::new("void", "void")))
        }
        "ptr_to_int" => {
            expect_arity(name, args, 1, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = ptrtoint {} {} to i64", ptr.ty, ptr.value));
            Ok(Some(IRValue::new(temp, "i64")))
        }
        "int_to_ptr" => {
            expect_arity(name, args, 1, position)?;
            let n = lower_expr(ctx, &args[0])?;
            let n = coerce(ctx, n, "i64", position)?;
            let temp = ctx.fresh_temp();
            ctx.emit(format!("{temp} = inttoptr i64 {} to i8*", n.value));
            Ok(Some(IRValue::new(temp, "i8*")))
        }
        "cstr_strlen" => {
            expect_arity(name, args, 1, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let ptr = coerce(ctx, ptr, "i8*", position)?;
            Ok(Some(emit_cstr_strlen(ctx, &ptr)))
        }
        "cstr_to_string" => {
            expect_arity(name, args, 1, position)?;
            let ptr = lower_expr(ctx, &args[0])?;
            let ptr = coerce(ctx, ptr, "i8*", position)?;
            let len = emit_cstr_strlen(ctx, &ptr);
            Ok(Some(build_string_struct(ctx, &ptr, &len)))
        }
        _ => Ok(None),
    }
}

fn build_string_struct(ctx: &mut LoweringContext, ptr: &IRValue, len: &IRValue) -> IRValue {
    let slot = ctx.fresh_temp();
    ctx.emit(format!("{slot} = alloca %struct.string"));
    let ptr_field = ctx.fresh_temp();
    ctx.emit(format!("{ptr_field} = getelementptr %struct.string, %struct.string* {slot}, i32 0, i32 0"));
    ctx.emit(format!("store i8* {}, i8** {ptr_field}", ptr.value));
    let len_field = ctx.fresh_temp();
    ctx.emit(format!("{len_field} = getelementptr %struct.string, %struct.string* {slot}, i32 0, i32 1"));
    ctx.emit(format!("store i64 {}, i64* {len_field}", len.value));
    IRValue::new(slot, "%struct.string*")
}

/// A byte-at-a-time strlen over a foreign `i8*`, using a stack-resident
/// induction variable rather than a `phi` (this is the one loop shape in
/// the engine that doesn't reuse the runtime's phi-loop pattern, since it
/// has no fixed entry/body predecessor pair to thread through).
fn emit_cstr_strlen(ctx: &mut LoweringContext, ptr: &IRValue) -> IRValue {
    let body_label = ctx.fresh_label("cstrlen.body");
    let end_label = ctx.fresh_label("cstrlen.end");
    let counter_slot = ctx.fresh_temp();
    ctx.emit(format!("{counter_slot} = alloca i64"));
    ctx.emit(format!("store i64 0, i64* {counter_slot}"));
    ctx.emit(format!("br label %{body_label}"));
    ctx.emit(format!("{body_label}:"));
    let idx = ctx.fresh_temp();
    ctx.emit(format!("{idx} = load i64, i64* {counter_slot}"));
    let byte_ptr = ctx.fresh_temp();
    ctx.emit(format!("{byte_ptr} = getelementptr i8, i8* {}, i64 {idx}", ptr.value));
    let byte = ctx.fresh_temp();
    ctx.emit(format!("{byte} = load i8, i8* {byte_ptr}"));
    let is_nul = ctx.fresh_temp();
    ctx.emit(format!("{is_nul} = icmp eq i8 {byte}, 0"));
    let next_idx = ctx.fresh_temp();
    ctx.emit(format!("{next_idx} = add i64 {idx}, 1"));
    ctx.emit(format!("store i64 {next_idx}, i64* {counter_slot}"));
    ctx.emit(format!("br i1 {is_nul}, label %{end_label}, label %{body_label}"));
    ctx.emit(format!("{end_label}:"));
    let len = ctx.fresh_temp();
    ctx.emit(format!("{len} = load i64, i64* {counter_slot}"));
    IRValue::new(len, "i64")
}

/// Call resolution, in order: `addrof` (pseudo-intrinsic), the predefined
/// builtin registry, the unsafe-only registry (gated on `ctx.unsafe_depth`),
/// then general callee evaluation.
pub fn lower_call(ctx: &mut LoweringContext, callee: &Expr, args: &[Expr], position: &Position) -> Result<IRValue, CodegenError> {
    if let Expr::Id(name, _) = callee {
        if name == "addrof" {
            expect_arity(name, args, 1, position)?;
            return lower_address_of(ctx, &args[0], position);
        }
        if let Some(result) = try_builtin(ctx, name, args, position)? {
            return Ok(result);
        }
        if ctx.unsafe_depth > 0 {
            if let Some(result) = try_unsafe_builtin(ctx, name, args, position)? {
                return Ok(result);
            }
        }
    }
    lower_general_call(ctx, callee, args, position)
}

/// `RET (P1, P2, ...)*` -> `(RET, [P1, P2, ...])`.
fn parse_fn_ptr_type(ty: &str) -> Option<(String, Vec<String>)> {
    let ty = ty.strip_suffix('*')?;
    let open = ty.find('(')?;
    let close = ty.rfind(')')?;
    let ret = ty[..open].trim().to_string();
    Some((ret, split_params(&ty[open + 1..close])))
}

fn split_params(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// `{ RET (P...)*, i8* }` -> `RET (P...)*`.
fn extract_closure_fn_ptr_type(obj_ty: &str) -> Option<String> {
    let inner = obj_ty.trim().strip_prefix('{')?.strip_suffix('}')?;
    split_params(inner).into_iter().next()
}

fn lower_general_call(ctx: &mut LoweringContext, callee: &Expr, args: &[Expr], position: &Position) -> Result<IRValue, CodegenError> {
    let callee_value = lower_expr(ctx, callee)?;

    if callee_value.is_closure_type() {
        return lower_closure_call(ctx, callee_value, args, position);
    }

    let (ret_ty, param_types) = parse_fn_ptr_type(&callee_value.ty)
        .ok_or_else(|| CodegenError::MalformedFunctionType { found: callee_value.ty.clone(), position: position.clone() })?;

    let meta = callee_value.called_symbol.as_ref().and_then(|sym| ctx.function_meta.get(sym).cloned());
    let is_sret = meta.as_ref().map(|m| m.is_sret).unwrap_or(false);
    let sret_ty = meta.and_then(|m| m.sret_ty);

    let mut remaining = param_types;
    let mut call_operands: Vec<String> = Vec::new();

    if let Some(receiver) = callee_value.class_instance_ptr.clone() {
        if !remaining.is_empty() {
            remaining.remove(0);
        }
        let this_ty = callee_value.class_instance_ptr_type.clone().unwrap_or_default();
        call_operands.push(format!("{this_ty} {receiver}"));
    }

    let mut sret_slot: Option<String> = None;
    if is_sret {
        if !remaining.is_empty() {
            remaining.remove(0);
        }
        let slot_ty = sret_ty.clone().unwrap_or_else(|| "i8".to_string());
        let slot = ctx.fresh_temp();
        ctx.emit(format!("{slot} = alloca {slot_ty}"));
        call_operands.push(format!("{slot_ty}* {slot}"));
        sret_slot = Some(slot);
    }

    if args.len() != remaining.len() {
        return Err(CodegenError::Arity {
            name: callee_value.called_symbol.clone().unwrap_or_else(|| callee_value.value.clone()),
            expected: remaining.len(),
            found: args.len(),
            position: position.clone(),
        });
    }
    for (arg_expr, param_ty) in args.iter().zip(remaining.iter()) {
        let value = lower_expr(ctx, arg_expr)?;
        let coerced = coerce(ctx, value, param_ty, position)?;
        call_operands.push(format!("{param_ty} {}", coerced.value));
    }

    if is_sret {
        ctx.emit(format!("call void {}({})", callee_value.value, call_operands.join(", ")));
        let slot = sret_slot.expect("sret slot allocated above");
        Ok(IRValue::new(slot, format!("{}*", sret_ty.unwrap_or_else(|| "i8".to_string()))))
    } else if ret_ty == "void" {
        ctx.emit(format!("call void {}({})", callee_value.value, call_operands.join(", ")));
        Ok(IRValue::new("void", "void"))
    } else {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = call {ret_ty} {}({})", callee_value.value, call_operands.join(", ")));
        Ok(IRValue::new(temp, ret_ty))
    }
}

/// Closures never return structs by SRET — an intentional, documented
/// scope limitation (see DESIGN.md) that lets call sites assume `is_sret
/// = false` for any dynamic function-pointer value, since a closure has no
/// single static symbol to look up in `function_meta`.
fn lower_closure_call(ctx: &mut LoweringContext, callee_value: IRValue, args: &[Expr], position: &Position) -> Result<IRValue, CodegenError> {
    let obj_ty = callee_value.ty.trim_end_matches('*').to_string();
    let fn_ptr_ty = extract_closure_fn_ptr_type(&obj_ty)
        .ok_or_else(|| CodegenError::MalformedFunctionType { found: callee_value.ty.clone(), position: position.clone() })?;

    let fn_ptr_slot = ctx.fresh_temp();
    ctx.emit(format!("{fn_ptr_slot} = getelementptr {obj_ty}, {obj_ty}* {}, i32 0, i32 0", callee_value.value));
    let fn_ptr_val = ctx.fresh_temp();
    ctx.emit(format!("{fn_ptr_val} = load {fn_ptr_ty}, {fn_ptr_ty}* {fn_ptr_slot}"));
    let env_slot = ctx.fresh_temp();
    ctx.emit(format!("{env_slot} = getelementptr {obj_ty}, {obj_ty}* {}, i32 0, i32 1", callee_value.value));
    let env_val = ctx.fresh_temp();
    ctx.emit(format!("{env_val} = load i8*, i8** {env_slot}"));

    let (ret_ty, param_types) = parse_fn_ptr_type(&fn_ptr_ty)
        .ok_or_else(|| CodegenError::MalformedFunctionType { found: fn_ptr_ty.clone(), position: position.clone() })?;
    let mut remaining = param_types;
    if !remaining.is_empty() {
        remaining.remove(0); // leading i8* env parameter
    }

    if args.len() != remaining.len() {
        return Err(CodegenError::Arity {
            name: "<closure>".to_string(),
            expected: remaining.len(),
            found: args.len(),
            position: position.clone(),
        });
    }
    let mut operands = vec![format!("i8* {env_val}")];
    for (arg_expr, param_ty) in args.iter().zip(remaining.iter()) {
        let value = lower_expr(ctx, arg_expr)?;
        let coerced = coerce(ctx, value, param_ty, position)?;
        operands.push(format!("{param_ty} {}", coerced.value));
    }

    if ret_ty == "void" {
        ctx.emit(format!("call void {fn_ptr_val}({})", operands.join(", ")));
        Ok(IRValue::new("void", "void"))
    } else {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = call {ret_ty} {fn_ptr_val}({})", operands.join(", ")));
        Ok(IRValue::new(temp, ret_ty))
    }
}

fn lower_new(ctx: &mut LoweringContext, class_name: &str, args: &[Expr], position: &Position) -> Result<IRValue, CodegenError> {
    let entry = ctx
        .classes
        .get(class_name)
        .cloned()
        .ok_or_else(|| CodegenError::UnknownClass { name: class_name.to_string(), position: position.clone() })?;
    let struct_ty = entry.llvm_type.clone();

    let size_ptr = ctx.fresh_temp();
    ctx.emit(format!("{size_ptr} = getelementptr {struct_ty}, {struct_ty}* null, i32 1"));
    let size = ctx.fresh_temp();
    ctx.emit(format!("{size} = ptrtoint {struct_ty}* {size_ptr} to i64"));
    let raw = ctx.fresh_temp();
    ctx.emit(format!("{raw} = call i8* @yulang_malloc(i64 {size})"));
    let instance = ctx.fresh_temp();
    ctx.emit(format!("{instance} = bitcast i8* {raw} to {struct_ty}*"));

    if let Some(ctor) = entry.constructor() {
        let mangled = ctx.mangler.mangle("constructor", &MangleContext::ClassMethod { class_name: class_name.to_string() });
        if args.len() != ctor.params.len() {
            return Err(CodegenError::Arity {
                name: mangled,
                expected: ctor.params.len(),
                found: args.len(),
                position: position.clone(),
            });
        }
        let mut operands = vec![format!("{struct_ty}* {instance}")];
        for (arg_expr, param) in args.iter().zip(&ctor.params) {
            let param_ty = param_llvm_type(ctx, &param.type_annotation);
            let value = lower_expr(ctx, arg_expr)?;
            let coerced = coerce(ctx, value, &param_ty, position)?;
            operands.push(format!("{param_ty} {}", coerced.value));
        }
        ctx.emit(format!("call void @{mangled}({})", operands.join(", ")));
    }

    Ok(IRValue::new(instance, format!("{struct_ty}*")))
}

fn lower_delete(ctx: &mut LoweringContext, inner: &Expr, position: &Position) -> Result<IRValue, CodegenError> {
    let value = lower_expr(ctx, inner)?;
    if !value.ty.ends_with('*') {
        return Err(CodegenError::TypeMismatch { expected: "pointer".to_string(), found: value.ty.clone(), position: position.clone() });
    }
    let struct_ty = value.ty.trim_end_matches('*').to_string();
    let size_ptr = ctx.fresh_temp();
    ctx.emit(format!("{size_ptr} = getelementptr {struct_ty}, {struct_ty}* null, i32 1"));
    let size = ctx.fresh_temp();
    ctx.emit(format!("{size} = ptrtoint {struct_ty}* {size_ptr} to i64"));

    let size_value = IRValue::new(size, "i64");
    let platform = ctx.platform;
    platform.emit_free(ctx, &value, &size_value);
    Ok(IRValue::null())
}

fn lower_cast(ctx: &mut LoweringContext, operand: &Expr, target_type: &TypeAnnotation, position: &Position) -> Result<IRValue, CodegenError> {
    let value = lower_expr(ctx, operand)?;
    let target_ty = ctx.types.map(target_type);

    if value.ty.ends_with('*') && target_ty == "i64" {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = ptrtoint {} {} to i64", value.ty, value.value));
        return Ok(IRValue::new(temp, "i64"));
    }
    if value.ty == "i64" && target_ty.ends_with('*') {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = inttoptr i64 {} to {target_ty}", value.value));
        return Ok(IRValue::new(temp, target_ty));
    }
    if value.ty.ends_with('*') && target_ty.ends_with('*') {
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = bitcast {} {} to {target_ty}", value.ty, value.value));
        return Ok(IRValue::new(temp, target_ty));
    }

    coerce(ctx, value, &target_ty, position)
        .map_err(|_| CodegenError::BadCastShape { detail: format!("cannot cast to `{target_ty}`"), position: position.clone() })
}

/// `GetExpr` lookup order: module export, array descriptor pseudo-field,
/// class field/bound method.
fn lower_get(ctx: &mut LoweringContext, receiver: &Expr, member: &str, position: &Position) -> Result<IRValue, CodegenError> {
    if let Expr::Id(name, _) = receiver {
        if let Some(entry) = ctx.scope.lookup(name).cloned() {
            if let Some(module) = ctx.module_objects.values().find(|m| m.global_name == entry.ptr).cloned() {
                let member_info = module.members.get(member).cloned().ok_or_else(|| CodegenError::UnknownMember {
                    class: module.struct_name.clone(),
                    member: member.to_string(),
                    position: position.clone(),
                })?;
                let field_ptr = ctx.fresh_temp();
                ctx.emit(format!(
                    "{field_ptr} = getelementptr {}, {}* {}, i32 0, i32 {}",
                    module.struct_name, module.struct_name, module.global_name, member_info.index
                ));
                let temp = ctx.fresh_temp();
                ctx.emit(format!("{temp} = load {}, {}* {field_ptr}", member_info.llvm_type, member_info.llvm_type));
                return Ok(IRValue::new(temp, member_info.llvm_type).with_called_symbol(member_info.ptr));
            }
        }
    }

    let receiver_value = lower_expr(ctx, receiver)?;

    let bare_ty =
        if receiver_value.ty.ends_with('*') { receiver_value.ty.trim_end_matches('*').to_string() } else { receiver_value.ty.clone() };

    if bare_ty.starts_with("%struct.array.") {
        return lower_array_field(ctx, &receiver_value.value, &bare_ty, member, position);
    }

    let class_name = bare_ty.trim_start_matches("%struct.").to_string();
    let entry = ctx
        .classes
        .get(&class_name)
        .cloned()
        .ok_or_else(|| CodegenError::UnknownClass { name: class_name.clone(), position: position.clone() })?;

    if let Some(member_info) = entry.members.get(member).cloned() {
        let field_ptr = ctx.fresh_temp();
        ctx.emit(format!(
            "{field_ptr} = getelementptr {bare_ty}, {bare_ty}* {}, i32 0, i32 {}",
            receiver_value.value, member_info.index
        ));
        let temp = ctx.fresh_temp();
        ctx.emit(format!("{temp} = load {}, {}* {field_ptr}", member_info.llvm_type, member_info.llvm_type));
        return Ok(IRValue::new(temp, member_info.llvm_type));
    }

    if let Some(method_decl) = entry.methods.get(member).cloned() {
        let mangled = ctx.mangler.mangle(member, &MangleContext::ClassMethod { class_name: class_name.clone() });
        let meta = ctx.function_meta.get(&mangled).cloned();
        let is_sret = meta.as_ref().map(|m| m.is_sret).unwrap_or(false);
        let ret_ty = ctx.types.map(&method_decl.return_type);
        let mut param_types = vec![format!("{bare_ty}*")];
        if is_sret {
            param_types.push(format!("{ret_ty}*"));
        }
        for p in &method_decl.params {
            param_types.push(param_llvm_type(ctx, &p.type_annotation));
        }
        let llvm_ret = if is_sret { "void".to_string() } else { ret_ty };
        let fn_ptr_type = format!("{llvm_ret} ({})*", param_types.join(", "));
        let value = IRValue::new(format!("@{mangled}"), fn_ptr_type)
            .with_called_symbol(mangled)
            .with_class_instance_ptr(receiver_value.value, format!("{bare_ty}*"));
        return Ok(value);
    }

    Err(CodegenError::UnknownMember { class: class_name, member: member.to_string(), position: position.clone() })
}

fn lower_array_field(
    ctx: &mut LoweringContext,
    ptr: &str,
    struct_ty: &str,
    member: &str,
    position: &Position,
) -> Result<IRValue, CodegenError> {
    let (index, field_ty) = match member {
        "ptr" => {
            let elem_ty = ctx.types.array_elem_type(struct_ty).unwrap_or_else(|| "i8".to_string());
            (0, format!("{elem_ty}*"))
        }
        "len" => (1, "i64".to_string()),
        "cap" => (2, "i64".to_string()),
        other => {
            return Err(CodegenError::UnknownMember { class: struct_ty.to_string(), member: other.to_string(), position: position.clone() })
        }
    };
    let field_ptr = ctx.fresh_temp();
    ctx.emit(format!("{field_ptr} = getelementptr {struct_ty}, {struct_ty}* {ptr}, i32 0, i32 {index}"));
    let temp = ctx.fresh_temp();
    ctx.emit(format!("{temp} = load {field_ty}, {field_ty}* {field_ptr}"));
    Ok(IRValue::new(temp, field_ty))
}

/// `ObjectLiteralExpr` has two modes: typed (`type_name` given, or an
/// enclosing `let`'s declared struct type via `ctx.expected_struct_type`)
/// initializes an existing class/struct's layout; untyped synthesizes an
/// anonymous struct type from the literal's own field order.
fn lower_object_literal(
    ctx: &mut LoweringContext,
    type_name: &Option<String>,
    fields: &[(String, Expr)],
    position: &Position,
) -> Result<IRValue, CodegenError> {
    let struct_ty = match type_name {
        Some(name) => format!("%struct.{name}"),
        None => ctx.expected_struct_type.clone().unwrap_or_else(|| {
            let id = ctx.fresh_object_literal_id();
            format!("%struct.object_literal_{id}")
        }),
    };
    let class_name = struct_ty.trim_start_matches("%struct.").to_string();

    let mut lowered_fields: Vec<(String, IRValue)> = Vec::new();
    for (name, field_expr) in fields {
        let value = lower_expr(ctx, field_expr)?;
        lowered_fields.push((name.clone(), value));
    }

    if !ctx.classes.contains_key(&class_name) {
        let mut members: HashMap<String, MemberInfo> = HashMap::new();
        let mut member_order = Vec::new();
        let mut field_types = Vec::new();
        for (index, (name, value)) in lowered_fields.iter().enumerate() {
            members.insert(name.clone(), MemberInfo { llvm_type: value.ty.clone(), index });
            member_order.push(name.clone());
            field_types.push(value.ty.clone());
        }
        ctx.push_type_decl(format!("{struct_ty} = type {{ {} }}", field_types.join(", ")));
        ctx.classes.insert(
            class_name.clone(),
            ClassEntry { llvm_type: struct_ty.clone(), member_order, members, methods: HashMap::new() },
        );
    }

    let entry = ctx.classes.get(&class_name).cloned().expect("just inserted or pre-existing");
    let slot = ctx.fresh_temp();
    ctx.emit(format!("{slot} = alloca {struct_ty}"));

    for (name, value) in lowered_fields {
        let member_info = entry.members.get(&name).cloned().ok_or_else(|| CodegenError::UnknownMember {
            class: class_name.clone(),
            member: name.clone(),
            position: position.clone(),
        })?;
        let coerced = coerce(ctx, value, &member_info.llvm_type, position)?;
        let field_ptr = ctx.fresh_temp();
        ctx.emit(format!("{field_ptr} = getelementptr {struct_ty}, {struct_ty}* {slot}, i32 0, i32 {}", member_info.index));
        ctx.emit(format!("store {} {}, {}* {field_ptr}", member_info.llvm_type, coerced.value, member_info.llvm_type));
    }

    Ok(IRValue::new(slot, format!("{struct_ty}*")))
}

/// `FunctionLiteralExpr`: captures its free variables by reference into a
/// synthesized env struct, lowers its body in isolation with `%arg0`
/// rebound to that env, hoists the rendered function before the first
/// ordinary top-level `define`, and returns a heap-allocated
/// `{ fnptr, i8* }` closure object.
fn lower_function_literal(
    ctx: &mut LoweringContext,
    params: &[Param],
    return_type: &TypeAnnotation,
    body: &crate::ast::Block,
    _position: &Position,
) -> Result<IRValue, CodegenError> {
    let id = ctx.fresh_closure_id();
    let fn_name = format!("_closure_{id}");

    let function_body_depth = ctx.scope.depth() + 1;
    let captures = ClosureAnalyzer::analyze(body, &ctx.scope, function_body_depth);

    let env_struct_ty = format!("%struct.closure_env_{id}");
    if !captures.is_empty() {
        let field_types: Vec<String> = captures.iter().map(|c| format!("{}*", c.llvm_type)).collect();
        ctx.push_type_decl(format!("{env_struct_ty} = type {{ {} }}", field_types.join(", ")));
    }

    let ret_ty = ctx.types.map(return_type);

    let mut param_decls = vec!["i8* %arg0".to_string()];
    for p in params {
        let ty = param_llvm_type(ctx, &p.type_annotation);
        param_decls.push(format!("{ty} %arg.{}", p.name));
    }

    let saved_ret_sig = std::mem::replace(&mut ctx.current_ret_sig, ret_ty.clone());
    let saved_sret_ty = ctx.current_sret_ty.take();
    let saved_env_ptr = ctx.env_ptr.take();
    let saved_env_struct_ty = ctx.env_struct_ty.take();
    let saved_captured_vars = std::mem::take(&mut ctx.captured_vars);

    let (result, body_ir) = ctx.with_isolated_buffer(|ctx| -> Result<(), CodegenError> {
        ctx.scope.enter_scope();
        let depth = ctx.scope.depth();

        if !captures.is_empty() {
            let env_typed = ctx.fresh_temp();
            ctx.emit(format!("{env_typed} = bitcast i8* %arg0 to {env_struct_ty}*"));
            ctx.env_ptr = Some(env_typed);
            ctx.env_struct_ty = Some(env_struct_ty.clone());
            for (index, capture) in captures.iter().enumerate() {
                ctx.captured_vars.insert(capture.name.clone(), (index, format!("{}*", capture.llvm_type)));
            }
        }

        for p in params {
            let ty = param_llvm_type(ctx, &p.type_annotation);
            if is_struct_value_type(ty.trim_end_matches('*')) && ty.ends_with('*') {
                ctx.scope.define(&p.name, SymbolEntry::new(ty.trim_end_matches('*').to_string(), format!("%arg.{}", p.name), depth));
            } else {
                let slot = ctx.fresh_temp();
                ctx.emit(format!("{slot} = alloca {ty}"));
                ctx.emit(format!("store {ty} %arg.{}, {ty}* {slot}", p.name));
                ctx.scope.define(&p.name, SymbolEntry::new(ty, slot, depth));
            }
        }

        stmt::lower_block_statements(ctx, body)?;
        stmt::ensure_terminator(ctx, &ret_ty, false);
        ctx.scope.exit_scope();
        Ok(())
    });
    result?;

    ctx.current_ret_sig = saved_ret_sig;
    ctx.current_sret_ty = saved_sret_ty;
    ctx.env_ptr = saved_env_ptr;
    ctx.env_struct_ty = saved_env_struct_ty;
    ctx.captured_vars = saved_captured_vars;

    let fn_text = format!("define internal {ret_ty} @{fn_name}({}) {{\nentry:\n{}\n}}\n", param_decls.join(", "), body_ir);
    ctx.push_hoisted_define(fn_text);

    let fn_param_types: Vec<String> =
        std::iter::once("i8*".to_string()).chain(params.iter().map(|p| param_llvm_type(ctx, &p.type_annotation))).collect();
    let fn_ptr_ty = format!("{ret_ty} ({})*", fn_param_types.join(", "));
    let closure_obj_ty = format!("{{ {fn_ptr_ty}, i8* }}");

    // Both the environment and the closure object are allocated on the heap,
    // not the stack: a closure is a first-class value that can be returned
    // from (and outlive) the call that created it, so neither can sit in a
    // frame that unwinds before the closure is invoked.
    let env_ptr_i8 = if captures.is_empty() {
        "null".to_string()
    } else {
        let env_size_ptr = ctx.fresh_temp();
        ctx.emit(format!("{env_size_ptr} = getelementptr {env_struct_ty}, {env_struct_ty}* null, i32 1"));
        let env_size = ctx.fresh_temp();
        ctx.emit(format!("{env_size} = ptrtoint {env_struct_ty}* {env_size_ptr} to i64"));
        let env_raw = ctx.emit_bump_allocate(&IRValue::new(env_size, "i64"));
        let env_slot = ctx.fresh_temp();
        ctx.emit(format!("{env_slot} = bitcast i8* {} to {env_struct_ty}*", env_raw.value));
        for (index, capture) in captures.iter().enumerate() {
            let field_ptr = ctx.fresh_temp();
            ctx.emit(format!("{field_ptr} = getelementptr {env_struct_ty}, {env_struct_ty}* {env_slot}, i32 0, i32 {index}"));
            ctx.emit(format!("store {}* {}, {}** {field_ptr}", capture.llvm_type, capture.ptr, capture.llvm_type));
        }
        env_raw.value
    };

    let closure_size_ptr = ctx.fresh_temp();
    ctx.emit(format!("{closure_size_ptr} = getelementptr {closure_obj_ty}, {closure_obj_ty}* null, i32 1"));
    let closure_size = ctx.fresh_temp();
    ctx.emit(format!("{closure_size} = ptrtoint {closure_obj_ty}* {closure_size_ptr} to i64"));
    let closure_raw = ctx.emit_bump_allocate(&IRValue::new(closure_size, "i64"));
    let closure_slot = ctx.fresh_temp();
    ctx.emit(format!("{closure_slot} = bitcast i8* {} to {closure_obj_ty}*", closure_raw.value));
    let fn_field = ctx.fresh_temp();
    ctx.emit(format!("{fn_field} = getelementptr {closure_obj_ty}, {closure_obj_ty}* {closure_slot}, i32 0, i32 0"));
    ctx.emit(format!("store {fn_ptr_ty} @{fn_name}, {fn_ptr_ty}* {fn_field}"));
    let env_field = ctx.fresh_temp();
    ctx.emit(format!("{env_field} = getelementptr {closure_obj_ty}, {closure_obj_ty}* {closure_slot}, i32 0, i32 1"));
    ctx.emit(format!("store i8* {env_ptr_i8}, i8** {env_field}"));

    Ok(IRValue::new(closure_slot, format!("{closure_obj_ty}*")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_function_pointer_type() {
        let (ret, params) = parse_fn_ptr_type("i64 (i64, i8*)*").unwrap();
        assert_eq!(ret, "i64");
        assert_eq!(params, vec!["i64", "i8*"]);
    }

    #[test]
    fn parses_a_zero_arg_function_pointer_type() {
        let (ret, params) = parse_fn_ptr_type("void ()*").unwrap();
        assert_eq!(ret, "void");
        assert!(params.is_empty());
    }

    #[test]
    fn split_params_respects_nested_parens() {
        let parts = split_params("i64, void (i64)*, i8*");
        assert_eq!(parts, vec!["i64", "void (i64)*", "i8*"]);
    }

    #[test]
    fn extracts_the_closure_fn_ptr_field() {
        let fn_ptr = extract_closure_fn_ptr_type("{ i64 (i8*, i64)*, i8* }").unwrap();
        assert_eq!(fn_ptr, "i64 (i8*, i64)*");
    }

    #[test]
    fn is_struct_value_type_excludes_pointers_and_primitives() {
        assert!(is_struct_value_type("%struct.Point"));
        assert!(!is_struct_value_type("%struct.Point*"));
        assert!(!is_struct_value_type("i64"));
    }
}
