//! Core identifier and classification types shared across the crate.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId(NonZeroU32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(NonZeroU32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(NonZeroU32);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: u32) -> Option<Self> {
                NonZeroU32::new(value).map(Self)
            }

            pub fn value(&self) -> u32 {
                self.0.get()
            }
        }
    };
}

impl_id!(RepoId);
impl_id!(FileId);
impl_id!(SymbolId);

/// Kinds of symbols a plugin may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Enum,
    Struct,
    Variable,
    Constant,
    Property,
    Parameter,
    Module,
    Namespace,
    Trait,
    Type,
    Field,
    Constructor,
    Decorator,
    Import,
    Export,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Struct => "struct",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Property => "property",
            Self::Parameter => "parameter",
            Self::Module => "module",
            Self::Namespace => "namespace",
            Self::Trait => "trait",
            Self::Type => "type",
            Self::Field => "field",
            Self::Constructor => "constructor",
            Self::Decorator => "decorator",
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "function" => Self::Function,
            "method" => Self::Method,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "enum" => Self::Enum,
            "struct" => Self::Struct,
            "variable" => Self::Variable,
            "constant" => Self::Constant,
            "property" => Self::Property,
            "parameter" => Self::Parameter,
            "module" => Self::Module,
            "namespace" => Self::Namespace,
            "trait" => Self::Trait,
            "type" => Self::Type,
            "field" => Self::Field,
            "constructor" => Self::Constructor,
            "decorator" => Self::Decorator,
            "import" => Self::Import,
            "export" => Self::Export,
            _ => return None,
        })
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a symbol is referenced at a use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Call,
    Import,
    Use,
    Extend,
    Implement,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Import => "import",
            Self::Use => "use",
            Self::Extend => "extend",
            Self::Implement => "implement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "call" => Self::Call,
            "import" => Self::Import,
            "use" => Self::Use,
            "extend" => Self::Extend,
            "implement" => Self::Implement,
            _ => return None,
        })
    }
}

/// Symbol visibility, where the language expresses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Protected => "protected",
            Self::Internal => "internal",
        }
    }
}
