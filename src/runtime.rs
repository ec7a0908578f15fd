//! RuntimeEmitter: the fixed prelude emitted once per module, before any
//! user code.
//!
//! Grounded on `src/compiler/mod.rs::prelude()` (a hand-written, emit-once
//! block of runtime support written directly as text), re-targeted from
//! NASM to LLVM IR. The platform-specific half (`__syscall6`'s inline-asm
//! body) comes from [`crate::platform::PlatformPort::emit_low_level_runtime`];
//! everything else here is target-independent.

use crate::platform::PlatformPort;

pub struct RuntimeEmitter;

impl RuntimeEmitter {
    /// Lang-item struct types (output part 3): `%struct.string`,
    /// `%struct.object`, and the free-list node type the allocator's
    /// bookkeeping would need if it ever grew beyond top-of-heap
    /// reclamation.
    pub fn emit_type_decls() -> String {
        "%struct.free_node = type { i64, i8* }\n\
         %struct.string = type { i8*, i64 }\n\
         %struct.object = type { i8* }\n"
            .to_string()
    }

    /// Heap bookkeeping globals (output part 4).
    pub fn emit_heap_globals() -> String {
        "@__heap_base = global i8* null\n\
         @__heap_brk = global i8* null\n\
         @__heap_initialized = global i1 false\n\
         @__free_list = global %struct.free_node* null\n"
            .to_string()
    }

    /// Runtime functions (output part 5): the platform's syscall wrapper,
    /// the byte-loop memcpy, the heap initializer, and `yulang_malloc`/
    /// `yulang_free`.
    pub fn emit_runtime_functions(platform: &dyn PlatformPort) -> String {
        let mut out = String::new();
        out.push_str(&platform.emit_low_level_runtime());
        out.push_str(MEMCPY_INLINE);
        out.push_str(HEAP_INIT);
        out.push_str(YULANG_MALLOC);
        out.push_str(YULANG_FREE);
        out.push_str(YULANG_TO_STRING);
        out.push_str(YULANG_TO_INT);
        out
    }
}

const MEMCPY_INLINE: &str = "\
define internal void @__memcpy_inline(i8* %dst, i8* %src, i64 %len) {\n\
entry:\n\
\tbr label %loop\n\
loop:\n\
\t%i = phi i64 [ 0, %entry ], [ %i.next, %body ]\n\
\t%done = icmp eq i64 %i, %len\n\
\tbr i1 %done, label %end, label %body\n\
body:\n\
\t%src.p = getelementptr i8, i8* %src, i64 %i\n\
\t%dst.p = getelementptr i8, i8* %dst, i64 %i\n\
\t%byte = load i8, i8* %src.p\n\
\tstore i8 %byte, i8* %dst.p\n\
\t%i.next = add i64 %i, 1\n\
\tbr label %loop\n\
end:\n\
\tret void\n\
}\n";

const HEAP_INIT: &str = "\
define internal void @__heap_init() {\n\
entry:\n\
\t%already = load i1, i1* @__heap_initialized\n\
\tbr i1 %already, label %end, label %init\n\
init:\n\
\t%brk0 = call i64 @__syscall6(i64 12, i64 0, i64 0, i64 0, i64 0, i64 0, i64 0)\n\
\t%base = inttoptr i64 %brk0 to i8*\n\
\tstore i8* %base, i8** @__heap_base\n\
\tstore i8* %base, i8** @__heap_brk\n\
\tstore i1 true, i1* @__heap_initialized\n\
\tbr label %end\n\
end:\n\
\tret void\n\
}\n";

const YULANG_MALLOC: &str = "\
define internal i8* @yulang_malloc(i64 %size) {\n\
entry:\n\
\tcall void @__heap_init()\n\
\t%rem = urem i64 %size, 8\n\
\t%pad = sub i64 8, %rem\n\
\t%pad.needed = icmp eq i64 %rem, 0\n\
\t%pad.final = select i1 %pad.needed, i64 0, i64 %pad\n\
\t%aligned = add i64 %size, %pad.final\n\
\t%old = load i8*, i8** @__heap_brk\n\
\t%old.i = ptrtoint i8* %old to i64\n\
\t%new.i = add i64 %old.i, %aligned\n\
\t%brk.result = call i64 @__syscall6(i64 12, i64 %new.i, i64 0, i64 0, i64 0, i64 0, i64 0)\n\
\t%new = inttoptr i64 %brk.result to i8*\n\
\tstore i8* %new, i8** @__heap_brk\n\
\tret i8* %old\n\
}\n";

const YULANG_FREE: &str = "\
define internal void @yulang_free(i8* %ptr, i64 %size) {\n\
entry:\n\
\t%rem = urem i64 %size, 8\n\
\t%pad = sub i64 8, %rem\n\
\t%pad.needed = icmp eq i64 %rem, 0\n\
\t%pad.final = select i1 %pad.needed, i64 0, i64 %pad\n\
\t%aligned = add i64 %size, %pad.final\n\
\t%ptr.i = ptrtoint i8* %ptr to i64\n\
\t%end.i = add i64 %ptr.i, %aligned\n\
\t%cur = load i8*, i8** @__heap_brk\n\
\t%cur.i = ptrtoint i8* %cur to i64\n\
\t%is.top = icmp eq i64 %end.i, %cur.i\n\
\tbr i1 %is.top, label %reclaim, label %noop\n\
reclaim:\n\
\tcall i64 @__syscall6(i64 12, i64 %ptr.i, i64 0, i64 0, i64 0, i64 0, i64 0)\n\
\tstore i8* %ptr, i8** @__heap_brk\n\
\tret void\n\
noop:\n\
\tret void\n\
}\n";

/// `toString(n: int) -> string`. Digit extraction by repeated
/// `udiv`/`urem` by 10, a leading `-` for negative magnitudes, `0` handled
/// by the same loop (an all-zero magnitude still counts one digit).
const YULANG_TO_STRING: &str = "\
define internal %struct.string* @yulang_to_string(i64 %n) {\n\
entry:\n\
\t%is_neg = icmp slt i64 %n, 0\n\
\t%neg_mag = sub i64 0, %n\n\
\t%mag = select i1 %is_neg, i64 %neg_mag, i64 %n\n\
\tbr label %count.loop\n\
count.loop:\n\
\t%cm = phi i64 [ %mag, %entry ], [ %cm.next, %count.loop ]\n\
\t%cn = phi i64 [ 0, %entry ], [ %cn.next, %count.loop ]\n\
\t%cm.next = udiv i64 %cm, 10\n\
\t%cn.next = add i64 %cn, 1\n\
\t%cm.done = icmp eq i64 %cm, 0\n\
\tbr i1 %cm.done, label %count.end, label %count.loop\n\
count.end:\n\
\t%digits.is.zero = icmp eq i64 %cn, 0\n\
\t%digits = select i1 %digits.is.zero, i64 1, i64 %cn\n\
\t%sign.len = select i1 %is_neg, i64 1, i64 0\n\
\t%total.len = add i64 %digits, %sign.len\n\
\t%buf = call i8* @yulang_malloc(i64 %total.len)\n\
\tbr i1 %is_neg, label %write.sign, label %write.digits.init\n\
write.sign:\n\
\tstore i8 45, i8* %buf\n\
\tbr label %write.digits.init\n\
write.digits.init:\n\
\tbr label %write.digits.loop\n\
write.digits.loop:\n\
\t%wm = phi i64 [ %mag, %write.digits.init ], [ %wm.next, %write.digits.loop ]\n\
\t%idx = phi i64 [ %digits, %write.digits.init ], [ %idx.next, %write.digits.loop ]\n\
\t%idx.next = sub i64 %idx, 1\n\
\t%digit = urem i64 %wm, 10\n\
\t%digit.byte0 = trunc i64 %digit to i8\n\
\t%digit.byte = add i8 %digit.byte0, 48\n\
\t%pos = add i64 %idx.next, %sign.len\n\
\t%slot = getelementptr i8, i8* %buf, i64 %pos\n\
\tstore i8 %digit.byte, i8* %slot\n\
\t%wm.next = udiv i64 %wm, 10\n\
\t%loop.done = icmp eq i64 %idx.next, 0\n\
\tbr i1 %loop.done, label %result, label %write.digits.loop\n\
result:\n\
\t%s.slot = alloca %struct.string\n\
\t%s.ptr.field = getelementptr %struct.string, %struct.string* %s.slot, i32 0, i32 0\n\
\tstore i8* %buf, i8** %s.ptr.field\n\
\t%s.len.field = getelementptr %struct.string, %struct.string* %s.slot, i32 0, i32 1\n\
\tstore i64 %total.len, i64* %s.len.field\n\
\tret %struct.string* %s.slot\n\
}\n";

/// `toInt(s: string) -> int`. Optional leading `-`, otherwise plain
/// base-10 accumulation.
const YULANG_TO_INT: &str = "\
define internal i64 @yulang_to_int(%struct.string* %s) {\n\
entry:\n\
\t%ptr.field = getelementptr %struct.string, %struct.string* %s, i32 0, i32 0\n\
\t%ptr = load i8*, i8** %ptr.field\n\
\t%len.field = getelementptr %struct.string, %struct.string* %s, i32 0, i32 1\n\
\t%len = load i64, i64* %len.field\n\
\t%first = load i8, i8* %ptr\n\
\t%is_neg = icmp eq i8 %first, 45\n\
\t%start = select i1 %is_neg, i64 1, i64 0\n\
\tbr label %loop\n\
loop:\n\
\t%i = phi i64 [ %start, %entry ], [ %i.next, %body ]\n\
\t%acc = phi i64 [ 0, %entry ], [ %acc.next, %body ]\n\
\t%done = icmp eq i64 %i, %len\n\
\tbr i1 %done, label %end, label %body\n\
body:\n\
\t%c.ptr = getelementptr i8, i8* %ptr, i64 %i\n\
\t%c = load i8, i8* %c.ptr\n\
\t%digit8 = sub i8 %c, 48\n\
\t%digit = zext i8 %digit8 to i64\n\
\t%acc10 = mul i64 %acc, 10\n\
\t%acc.next = add i64 %acc10, %digit\n\
\t%i.next = add i64 %i, 1\n\
\tbr label %loop\n\
end:\n\
\t%neg = sub i64 0, %acc\n\
\t%result = select i1 %is_neg, i64 %neg, i64 %acc\n\
\tret i64 %result\n\
}\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::X86_64Linux;

    #[test]
    fn type_decls_include_lang_items() {
        let decls = RuntimeEmitter::emit_type_decls();
        assert!(decls.contains("%struct.string = type { i8*, i64 }"));
        assert!(decls.contains("%struct.object"));
    }

    #[test]
    fn heap_globals_include_the_initialized_flag() {
        let globals = RuntimeEmitter::emit_heap_globals();
        assert!(globals.contains("@__heap_initialized = global i1 false"));
    }

    #[test]
    fn runtime_functions_include_malloc_and_free() {
        let text = RuntimeEmitter::emit_runtime_functions(&X86_64Linux);
        assert!(text.contains("@yulang_malloc"));
        assert!(text.contains("@yulang_free"));
        assert!(text.contains("@__syscall6"));
    }

    #[test]
    fn runtime_functions_include_to_string_and_to_int() {
        let text = RuntimeEmitter::emit_runtime_functions(&X86_64Linux);
        assert!(text.contains("@yulang_to_string"));
        assert!(text.contains("@yulang_to_int"));
    }

    #[test]
    fn free_checks_top_of_heap_by_end_address() {
        assert!(YULANG_FREE.contains("%end.i = add i64 %ptr.i, %aligned"));
        assert!(YULANG_FREE.contains("icmp eq i64 %end.i, %cur.i"));
    }
}
