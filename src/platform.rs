//! PlatformPort: the collaborator interface abstracting target-specific
//! codegen, and its two concrete bare-metal Linux implementations.
//!
//! Grounded on `src/asm/mod.rs`'s `Reg`/`Instruction::Syscall` register
//! vocabulary, generalized from a compile-time `#[cfg(target_os)]` split
//! (legacy compiler) to a runtime enum match: this is a cross-compiler, so
//! the IR's target triple need not equal the host the compiler itself runs
//! on.

use crate::orchestrator::LoweringContext;
use crate::value::IRValue;

/// Supplies everything target-specific the lowering engine needs but does
/// not want to special-case inline.
pub trait PlatformPort {
    fn target_triple(&self) -> &'static str;
    fn data_layout(&self) -> &'static str;
    fn pointer_width_bits(&self) -> u32;

    /// Lowers a `syscall(num, a1..a6)` call to the platform's inline-asm
    /// wrapper invocation, returning the `i64` result.
    fn emit_syscall(&self, ctx: &mut LoweringContext, num: &IRValue, args: &[IRValue]) -> IRValue;

    /// Emits a heap-grow request for `size` bytes, returning the old break
    /// (`i8*`) — the allocated region's start.
    fn emit_allocate(&self, ctx: &mut LoweringContext, size: &IRValue) -> IRValue;

    /// Emits a top-of-heap release of `size` bytes starting at `ptr`; no
    /// result (the bump allocator has no free-list).
    fn emit_free(&self, ctx: &mut LoweringContext, ptr: &IRValue, size: &IRValue);

    /// Emits the platform-specific piece of the runtime prelude: the
    /// `__syscall6` inline-asm wrapper definition. Returns the IR text; the
    /// `RuntimeEmitter` splices it into the rest of the prelude.
    fn emit_low_level_runtime(&self) -> String;

    /// Emits `target triple`/`target datalayout` lines (output parts 1-2).
    fn emit_global_definitions(&self) -> String {
        format!(
            "target triple = \"{}\"\ntarget datalayout = \"{}\"\n",
            self.target_triple(),
            self.data_layout()
        )
    }
}

/// Bare-metal x86-64 Linux: syscalls via the `syscall` instruction,
/// `rax, rdi, rsi, rdx, r10, r8, r9` argument convention.
pub struct X86_64Linux;

impl PlatformPort for X86_64Linux {
    fn target_triple(&self) -> &'static str {
        "x86_64-unknown-linux-gnu"
    }

    fn data_layout(&self) -> &'static str {
        "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
    }

    fn pointer_width_bits(&self) -> u32 {
        64
    }

    fn emit_syscall(&self, ctx: &mut LoweringContext, num: &IRValue, args: &[IRValue]) -> IRValue {
        ctx.emit_syscall6_call(num, args)
    }

    fn emit_allocate(&self, ctx: &mut LoweringContext, size: &IRValue) -> IRValue {
        ctx.emit_bump_allocate(size)
    }

    fn emit_free(&self, ctx: &mut LoweringContext, ptr: &IRValue, size: &IRValue) {
        ctx.emit_bump_free(ptr, size);
    }

    fn emit_low_level_runtime(&self) -> String {
        "define internal i64 @__syscall6(i64 %n, i64 %a1, i64 %a2, i64 %a3, i64 %a4, i64 %a5, i64 %a6) {\n\
         entry:\n\
         \t%result = call i64 asm sideeffect \"syscall\", \"={rax},{rax},{rdi},{rsi},{rdx},{r10},{r8},{r9}\"(i64 %n, i64 %a1, i64 %a2, i64 %a3, i64 %a4, i64 %a5, i64 %a6)\n\
         \tret i64 %result\n\
         }\n"
            .to_string()
    }
}

/// Bare-metal AArch64 Linux: syscalls via `svc #0`,
/// `x8, x0..x5` argument convention (six general syscall args).
pub struct Aarch64Linux;

impl PlatformPort for Aarch64Linux {
    fn target_triple(&self) -> &'static str {
        "aarch64-unknown-linux-gnu"
    }

    fn data_layout(&self) -> &'static str {
        "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128"
    }

    fn pointer_width_bits(&self) -> u32 {
        64
    }

    fn emit_syscall(&self, ctx: &mut LoweringContext, num: &IRValue, args: &[IRValue]) -> IRValue {
        ctx.emit_syscall6_call(num, args)
    }

    fn emit_allocate(&self, ctx: &mut LoweringContext, size: &IRValue) -> IRValue {
        ctx.emit_bump_allocate(size)
    }

    fn emit_free(&self, ctx: &mut LoweringContext, ptr: &IRValue, size: &IRValue) {
        ctx.emit_bump_free(ptr, size);
    }

    fn emit_low_level_runtime(&self) -> String {
        "define internal i64 @__syscall6(i64 %n, i64 %a1, i64 %a2, i64 %a3, i64 %a4, i64 %a5, i64 %a6) {\n\
         entry:\n\
         \t%result = call i64 asm sideeffect \"svc #0\", \"={x0},{x8},{x0},{x1},{x2},{x3},{x4},{x5}\"(i64 %n, i64 %a1, i64 %a2, i64 %a3, i64 %a4, i64 %a5, i64 %a6)\n\
         \tret i64 %result\n\
         }\n"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_64_triple_is_stable() {
        assert_eq!(X86_64Linux.target_triple(), "x86_64-unknown-linux-gnu");
        assert_eq!(X86_64Linux.pointer_width_bits(), 64);
    }

    #[test]
    fn aarch64_uses_svc_in_its_runtime() {
        assert!(Aarch64Linux.emit_low_level_runtime().contains("svc #0"));
    }

    #[test]
    fn global_definitions_include_both_triple_and_layout() {
        let text = X86_64Linux.emit_global_definitions();
        assert!(text.contains("target triple"));
        assert!(text.contains("target datalayout"));
    }
}
