//! Ambient CLI/config surface.
//!
//! Grounded on `src/bin/why/cli.rs` (`clap`-derived struct, a `ValueEnum`
//! for verbosity resolved into `log::Level`); `Target` mirrors the
//! runtime-enum-match split `src/compiler/mod.rs` does at compile time with
//! `#[cfg(target_os = ...)]`.

use crate::platform::{Aarch64Linux, PlatformPort, X86_64Linux};

/// Which bare-metal Linux target the emitted IR is for. Selects the
/// [`PlatformPort`] implementation; independent of the host the compiler
/// itself runs on (this is a cross-compiler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    X86_64,
    Aarch64,
}

impl Target {
    pub fn platform(self) -> Box<dyn PlatformPort> {
        match self {
            Target::X86_64 => Box::new(X86_64Linux),
            Target::Aarch64 => Box::new(Aarch64Linux),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "x86-64" | "amd64" => Ok(Target::X86_64),
            "aarch64" | "arm64" => Ok(Target::Aarch64),
            other => Err(format!("unknown target `{other}` (expected x86_64 or aarch64)")),
        }
    }
}

/// What the orchestrator needs to know beyond the AST itself: which
/// target to lower for, and the mangling policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub prog_mangling_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { target: Target::default(), prog_mangling_enabled: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parses_common_spellings() {
        assert_eq!("x86_64".parse::<Target>().unwrap(), Target::X86_64);
        assert_eq!("arm64".parse::<Target>().unwrap(), Target::Aarch64);
        assert!("riscv".parse::<Target>().is_err());
    }

    #[test]
    fn default_config_uses_x86_64_and_no_prog_mangling() {
        let config = Config::default();
        assert_eq!(config.target, Target::X86_64);
        assert!(!config.prog_mangling_enabled);
    }
}
