//! ModuleOrchestrator and LoweringContext: the top-level driver and the
//! mutable generator state every visitor threads through.
//!
//! Grounded on `src/compiler/mod.rs`'s `Compiler::{compile_program,
//! write_data_section, write_text_section}` staged-section-assembly
//! pattern, generalized from "data section then text section then exit
//! stub" to a nine-part LLVM module layout. The scope stack, class table,
//! string intern table, and emission buffers are encapsulated in one value
//! (`LoweringContext`) owned by the orchestrator and passed explicitly,
//! rather than kept as ad hoc fields scattered across visitor structs.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::{debug, info, trace};

use crate::ast::{
    ClassDecl, DeclareFnDecl, FunctionDecl, Program, StructDecl, TopLevelItem,
};
use crate::config::Config;
use crate::error::CodegenError;
use crate::mangle::{MangleContext, NameMangler};
use crate::modules::{ClassEntry, ModuleObject, ModuleObjectBuilder};
use crate::platform::PlatformPort;
use crate::runtime::RuntimeEmitter;
use crate::scope::ScopeStack;
use crate::strings::StringTable;
use crate::types::TypeMapper;
use crate::value::IRValue;

/// SRET/arity metadata recorded for every function this engine itself
/// defines, keyed by its mangled `@symbol` — a side channel avoids
/// re-deriving this ambiguously from a type string at method call sites,
/// where the first parameter is always `this`.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub is_sret: bool,
    pub sret_ty: Option<String>,
    pub is_method: bool,
}

/// The generator every visitor function receives. Owns the scope stack,
/// the class/module tables, the string intern table, the SSA/label
/// counters, and every emission buffer.
pub struct LoweringContext<'p> {
    pub scope: ScopeStack,
    pub types: TypeMapper,
    pub mangler: NameMangler,
    pub strings: StringTable,
    pub classes: HashMap<String, ClassEntry>,
    pub module_objects: HashMap<String, ModuleObject>,
    /// Full path → top-level items, as supplied by the parser's module
    /// table.
    pub module_registry: HashMap<String, Vec<TopLevelItem>>,
    pub current_source_path: String,
    pub platform: &'p dyn PlatformPort,

    /// The current function's linear IR buffer. Swapped out via
    /// `take_function_buffer` when a `define` finishes.
    buffer: Vec<String>,
    /// Function bodies discovered mid-emission (closures lowered inside
    /// another function) that must be spliced before the first top-level
    /// `define` (hoisting).
    hoisted_defines: Vec<String>,
    /// Completed top-level `declare`/`define` text, in declare-then-define
    /// order.
    declarations: Vec<String>,
    definitions: Vec<String>,
    /// User/imported struct type declarations (output part 6).
    type_decls: Vec<String>,
    /// Module-object type & global definitions (output part 7).
    module_decls: Vec<String>,

    temp_counter: usize,
    label_counter: usize,
    declared_functions: HashSet<String>,
    defined_functions: HashSet<String>,

    /// Nesting depth of `unsafe { }` blocks; > 0 unlocks the extra builtin
    /// registry.
    pub unsafe_depth: u32,
    /// Set by `let`/`const` lowering when the declared type is a struct
    /// value, so a directly-initializing `ObjectLiteralExpr` knows which
    /// struct to zero-initialize.
    pub expected_struct_type: Option<String>,

    /// SRET/arity metadata for every function/method this engine defines,
    /// keyed by mangled `@symbol`. See [`FunctionMeta`].
    pub function_meta: HashMap<String, FunctionMeta>,
    /// While lowering a closure body: the bitcast `%struct.closure_env_N*`
    /// the env pointer was narrowed to, and that struct's type name, used
    /// by captured-variable reads/writes.
    pub env_ptr: Option<String>,
    pub env_struct_ty: Option<String>,
    /// name -> (field index in the env struct, field LLVM type), populated
    /// when entering a closure body.
    pub captured_vars: HashMap<String, (usize, String)>,
    /// The enclosing function's declared return type, consulted by
    /// `Return` lowering.
    pub current_ret_sig: String,
    /// `Some(struct_ty)` while lowering a function whose return is SRET;
    /// `Return` then memcpies into `%agg.result` instead of a plain `ret`.
    pub current_sret_ty: Option<String>,

    object_literal_counter: usize,
    closure_counter: usize,
}

impl<'p> LoweringContext<'p> {
    pub fn new(platform: &'p dyn PlatformPort, config: &Config) -> Self {
        LoweringContext {
            scope: ScopeStack::new(),
            types: TypeMapper::new(),
            mangler: NameMangler::new(config.prog_mangling_enabled),
            strings: StringTable::new(),
            classes: HashMap::new(),
            module_objects: HashMap::new(),
            module_registry: HashMap::new(),
            current_source_path: String::new(),
            platform,
            buffer: Vec::new(),
            hoisted_defines: Vec::new(),
            declarations: Vec::new(),
            definitions: Vec::new(),
            type_decls: Vec::new(),
            module_decls: Vec::new(),
            temp_counter: 0,
            label_counter: 0,
            declared_functions: HashSet::new(),
            defined_functions: HashSet::new(),
            unsafe_depth: 0,
            expected_struct_type: None,
            function_meta: HashMap::new(),
            env_ptr: None,
            env_struct_ty: None,
            captured_vars: HashMap::new(),
            current_ret_sig: "void".to_string(),
            current_sret_ty: None,
            object_literal_counter: 0,
            closure_counter: 0,
        }
    }

    pub fn fresh_temp(&mut self) -> String {
        let name = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub fn fresh_label(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}.{}", self.label_counter);
        self.label_counter += 1;
        name
    }

    /// Appends one line to the current function's IR buffer.
    pub fn emit(&mut self, line: impl Into<String>) {
        let line = line.into();
        trace!("emit: {line}");
        self.buffer.push(line);
    }

    /// Takes and clears the current function buffer, joined into one block
    /// of text (used when a `define` finishes).
    pub fn take_function_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer).join("\n")
    }

    /// Stashes a fully rendered nested-function `define` block into the
    /// hoisted-definitions buffer. Does not disturb the current function's
    /// own buffer, since the nested function was lowered into an isolated
    /// buffer already.
    pub fn push_hoisted_define(&mut self, text: String) {
        self.hoisted_defines.push(text);
    }

    /// Runs `body` with a fresh, empty function buffer (used to lower a
    /// closure's body in isolation), restoring the outer buffer afterward,
    /// and returns whatever text accumulated.
    pub fn with_isolated_buffer<T>(&mut self, body: impl FnOnce(&mut Self) -> T) -> (T, String) {
        let saved = std::mem::take(&mut self.buffer);
        let result = body(self);
        let text = self.take_function_buffer();
        self.buffer = saved;
        (result, text)
    }

    pub fn declare_struct(&mut self, decl: &StructDecl) -> Result<(), CodegenError> {
        if self.classes.contains_key(&decl.name) {
            return Ok(());
        }
        let field_types: Vec<String> =
            decl.members.iter().map(|m| self.types.map(&m.type_annotation)).collect();
        let entry = ClassEntry::from_struct_decl(decl, field_types.clone());
        let fields = field_types.join(", ");
        self.type_decls.push(format!("{} = type {{ {fields} }}", entry.llvm_type));
        debug!("declared struct {}", decl.name);
        self.classes.insert(decl.name.clone(), entry);
        Ok(())
    }

    pub fn declare_class(&mut self, decl: &ClassDecl) -> Result<(), CodegenError> {
        if self.classes.contains_key(&decl.name) {
            return Ok(());
        }
        let field_types: Vec<String> =
            decl.members.iter().map(|m| self.types.map(&m.type_annotation)).collect();
        let entry = ClassEntry::from_class_decl(decl, field_types.clone());
        let fields = field_types.join(", ");
        self.type_decls.push(format!("{} = type {{ {fields} }}", entry.llvm_type));
        debug!("declared class {}", decl.name);
        self.classes.insert(decl.name.clone(), entry);
        Ok(())
    }

    /// Emits a forward `declare` line for a foreign prototype and binds a
    /// function-pointer symbol in the global scope; returns the function
    /// pointer's LLVM type string.
    pub fn declare_foreign_function(
        &mut self,
        decl: &DeclareFnDecl,
    ) -> Result<String, CodegenError> {
        let ret = self.types.map(&decl.return_type);
        let params: Vec<String> =
            decl.params.iter().map(|p| self.types.map(&p.type_annotation)).collect();
        let param_list = params.join(", ");
        self.declarations.push(format!("declare {ret} @{}({param_list})", decl.name));
        let fn_ptr_type = format!("{ret} ({param_list})*");
        self.scope.define_global(
            &decl.name,
            crate::scope::SymbolEntry::new(fn_ptr_type.clone(), format!("@{}", decl.name), 0),
        );
        Ok(fn_ptr_type)
    }

    /// Declares and immediately defines an exported top-level function
    /// under the module-export mangling scheme, for `ModuleObjectBuilder`.
    /// Returns the function pointer's LLVM type string.
    pub fn declare_and_define_module_function(
        &mut self,
        func: &FunctionDecl,
        mangled_name: &str,
    ) -> Result<String, CodegenError> {
        crate::lower::stmt::lower_function_decl_with_name(self, func, mangled_name, None)
    }

    pub fn emit_module_object_decl(&mut self, module: &ModuleObject) {
        let field_types: Vec<String> =
            module.member_order.iter().map(|n| module.members[n].llvm_type.clone()).collect();
        self.module_decls
            .push(format!("{} = type {{ {} }}", module.struct_name, field_types.join(", ")));
        let init_list: Vec<String> = module
            .member_order
            .iter()
            .map(|n| {
                let member = &module.members[n];
                format!("{} {}", member.llvm_type, member.ptr)
            })
            .collect();
        self.module_decls.push(format!(
            "{} = internal global {} {{ {} }}",
            module.global_name,
            module.struct_name,
            init_list.join(", ")
        ));
    }

    /// Declare-pass dedup key: `sourceFilePath:functionName` deduplicates
    /// both passes.
    fn dedup_key(&self, name: &str) -> String {
        format!("{}:{}", self.current_source_path, name)
    }

    pub fn mark_declared(&mut self, name: &str) -> bool {
        self.declared_functions.insert(self.dedup_key(name))
    }

    pub fn mark_defined(&mut self, name: &str) -> bool {
        self.defined_functions.insert(self.dedup_key(name))
    }

    pub fn push_declaration_text(&mut self, text: String) {
        self.declarations.push(text);
    }

    pub fn push_definition_text(&mut self, text: String) {
        self.definitions.push(text);
    }

    /// Registers a synthesized struct type declaration (closure env
    /// structs, anonymous object-literal structs) alongside user type
    /// declarations (output part 6).
    pub fn push_type_decl(&mut self, text: String) {
        self.type_decls.push(text);
    }

    /// Fresh id for an anonymous `%struct.object_literal_N`.
    pub fn fresh_object_literal_id(&mut self) -> usize {
        let id = self.object_literal_counter;
        self.object_literal_counter += 1;
        id
    }

    /// Fresh id for a closure's env struct / hoisted function name.
    pub fn fresh_closure_id(&mut self) -> usize {
        let id = self.closure_counter;
        self.closure_counter += 1;
        id
    }

    /// Peeks the most recently emitted line of the current function buffer
    /// without consuming it, used to decide whether a block already ends
    /// in a terminator.
    pub fn last_emitted_line(&self) -> Option<&str> {
        self.buffer.last().map(String::as_str)
    }

    /// Lowers an internal `syscall(num, a1..a6)` builtin to a call of the
    /// platform's `__syscall6` wrapper, padding missing trailing arguments
    /// with `0`.
    pub fn emit_syscall6_call(&mut self, num: &IRValue, args: &[IRValue]) -> IRValue {
        let mut operands = vec![format!("i64 {}", num.value)];
        for i in 0..6 {
            if let Some(arg) = args.get(i) {
                operands.push(format!("i64 {}", crate::lower::expr::as_i64_operand(self, arg)));
            } else {
                operands.push("i64 0".to_string());
            }
        }
        let temp = self.fresh_temp();
        self.emit(format!(
            "{temp} = call i64 @__syscall6({})",
            operands.join(", ")
        ));
        IRValue::new(temp, "i64")
    }

    /// `PlatformPort::emit_allocate`: bumps the heap by `size` bytes via
    /// `yulang_malloc`, returning the old break (`i8*`).
    pub fn emit_bump_allocate(&mut self, size: &IRValue) -> IRValue {
        let temp = self.fresh_temp();
        self.emit(format!("{temp} = call i8* @yulang_malloc(i64 {})", size.value));
        IRValue::new(temp, "i8*")
    }

    /// `PlatformPort::emit_free`: releases `size` bytes at `ptr` if it is
    /// the current top of heap (no-op otherwise, per `yulang_free`).
    pub fn emit_bump_free(&mut self, ptr: &IRValue, size: &IRValue) {
        let ptr_i8 = if ptr.ty == "i8*" {
            ptr.value.clone()
        } else {
            let temp = self.fresh_temp();
            self.emit(format!("{temp} = bitcast {} {} to i8*", ptr.ty, ptr.value));
            temp
        };
        self.emit(format!("call void @yulang_free(i8* {ptr_i8}, i64 {})", size.value));
    }
}

/// Top-level driver: two-phase declare/define pass over top-level nodes,
/// hoisting splice, and final assembly of the nine-part output.
pub struct ModuleOrchestrator;

impl ModuleOrchestrator {
    pub fn lower_program(
        program: &Program,
        platform: &dyn PlatformPort,
        config: &Config,
        source_path: &str,
        module_registry: HashMap<String, Vec<TopLevelItem>>,
    ) -> Result<String> {
        let mut ctx = LoweringContext::new(platform, config);
        ctx.current_source_path = source_path.to_string();
        ctx.module_registry = module_registry;

        info!("lowering {source_path}");

        // (a) imports first, so module objects exist before anything else
        // references them.
        for item in &program.items {
            if let TopLevelItem::Import(import) = item {
                let value = ModuleObjectBuilder::build(&mut ctx, &import.path)
                    .with_context(|| format!("importing `{}`", import.path))?;
                let alias = import.alias.clone().unwrap_or_else(|| import.path.clone());
                ctx.scope.define_global(
                    &alias,
                    crate::scope::SymbolEntry::new(
                        value.ptr_type.clone().unwrap_or_default(),
                        value.ptr.clone().unwrap_or_default(),
                        0,
                    ),
                );
            }
        }

        // (b) type declarations (structs/classes) before any function
        // signature can reference them.
        for item in &program.items {
            match item {
                TopLevelItem::StructDecl(decl) => ctx.declare_struct(decl)?,
                TopLevelItem::ClassDecl(decl) => ctx.declare_class(decl)?,
                _ => {}
            }
        }

        // (c) declare pass: register every function symbol (including
        // class methods and foreign prototypes) before any definition is
        // emitted, so a forward reference always resolves.
        for item in &program.items {
            crate::lower::stmt::declare_top_level(&mut ctx, item)?;
        }

        // (d) define pass, in source order; nested/closure bodies
        // discovered along the way land in `hoisted_defines` instead of
        // `definitions` directly.
        for item in &program.items {
            crate::lower::stmt::define_top_level(&mut ctx, item)?;
        }

        Ok(Self::assemble(&mut ctx))
    }

    /// Concatenates the nine-part output, splicing hoisted definitions
    /// before the first ordinary `define`.
    fn assemble(ctx: &mut LoweringContext) -> String {
        let mut out = String::new();
        out.push_str(&ctx.platform.emit_global_definitions());
        out.push('\n');
        out.push_str(&RuntimeEmitter::emit_type_decls());
        out.push('\n');
        out.push_str(&RuntimeEmitter::emit_heap_globals());
        out.push('\n');
        out.push_str(&RuntimeEmitter::emit_runtime_functions(ctx.platform));
        out.push('\n');

        for decl in &ctx.type_decls {
            out.push_str(decl);
            out.push('\n');
        }
        for decl in ctx.types.take_pending_array_decls() {
            out.push_str(&decl);
            out.push('\n');
        }
        out.push('\n');

        for decl in &ctx.module_decls {
            out.push_str(decl);
            out.push('\n');
        }
        out.push('\n');

        for decl in &ctx.declarations {
            out.push_str(decl);
            out.push('\n');
        }
        out.push('\n');

        for hoisted in &ctx.hoisted_defines {
            out.push_str(hoisted);
            out.push('\n');
        }
        for def in &ctx.definitions {
            out.push_str(def);
            out.push('\n');
        }
        out.push('\n');

        out.push_str(&ctx.strings.emit_declarations());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::X86_64Linux;

    #[test]
    fn empty_program_still_emits_the_runtime_prelude() {
        let program = Program { items: vec![] };
        let platform = X86_64Linux;
        let config = Config::default();
        let ir = ModuleOrchestrator::lower_program(
            &program,
            &platform,
            &config,
            "main.yu",
            HashMap::new(),
        )
        .expect("lowering succeeds");
        assert!(ir.contains("target triple"));
        assert!(ir.contains("@yulang_malloc"));
        assert!(ir.contains("%struct.string = type { i8*, i64 }"));
    }
}
