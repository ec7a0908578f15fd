//! NameMangler: deterministic symbol-name scheme.
//!
//! Rules are applied in order — a class method always mangles via rule 1
//! even if it also happens to live in an exported file; `main` never
//! mangles regardless of any other flag.

/// What kind of top-level binding a name belongs to, decided by the caller
/// (`StatementLowerer`/`ModuleObjectBuilder`) before asking for a mangled
/// name.
#[derive(Debug, Clone)]
pub enum MangleContext {
    /// A method of class `class_name`.
    ClassMethod { class_name: String },
    /// A top-level function/const re-exported to importers of `source_path`.
    Exported { source_path: String },
    /// An ordinary top-level, non-exported binding.
    Plain,
}

pub struct NameMangler {
    /// Whether rule 3 (`_prog_` mangling for plain top-level names) is
    /// enabled. Off by default to match a freestanding program whose only
    /// externally visible symbol is `main`.
    pub prog_mangling_enabled: bool,
}

impl NameMangler {
    pub fn new(prog_mangling_enabled: bool) -> Self {
        NameMangler { prog_mangling_enabled }
    }

    pub fn mangle(&self, name: &str, ctx: &MangleContext) -> String {
        if name == "main" {
            return "main".to_string();
        }
        match ctx {
            MangleContext::ClassMethod { class_name } => format!("_cls_{class_name}_{name}"),
            MangleContext::Exported { source_path } => {
                format!("_mod_{}_{name}", sanitize_path(source_path))
            }
            MangleContext::Plain => {
                if self.prog_mangling_enabled {
                    format!("_prog_{name}")
                } else {
                    name.to_string()
                }
            }
        }
    }
}

/// Strips a trailing `.yu` suffix, then replaces every non-alphanumeric
/// character with `_`.
fn sanitize_path(path: &str) -> String {
    let trimmed = path.strip_suffix(".yu").unwrap_or(path);
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
