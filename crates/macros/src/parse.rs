//! Attribute parsing for the DataClass derive macro

use darling::{FromDeriveInput, FromField, FromMeta};
use syn::{Expr, Ident, Path, Type, Visibility};

/// Parsed #[data(...)] attributes on the struct
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(data), supports(struct_named))]
pub struct DataClassArgs {
    /// Struct identifier
    pub ident: Ident,

    /// Struct visibility
    pub vis: Visibility,

    /// Struct fields
    pub data: darling::ast::Data<(), DataFieldArgs>,

    /// Registered type name (defaults to the struct name)
    #[darling(default)]
    pub name: Option<String>,
}

impl DataClassArgs {
    pub fn type_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.ident.to_string())
    }
}

/// Default value expression, taken as written
#[derive(Debug, Clone)]
pub struct DefaultExpr(pub Expr);

impl FromMeta for DefaultExpr {
    fn from_expr(expr: &Expr) -> darling::Result<Self> {
        Ok(Self(expr.clone()))
    }
}

/// Parsed #[data(...)] attributes on a field
#[derive(Debug, FromField)]
#[darling(attributes(data))]
pub struct DataFieldArgs {
    /// Field identifier
    pub ident: Option<Ident>,

    /// Field type
    pub ty: Type,

    /// Serialization key when it differs from the property name
    #[darling(default)]
    pub key: Option<String>,

    /// Default value (`default = 100`, `default = "name"`)
    #[darling(default)]
    pub default: Option<DefaultExpr>,

    /// Writable only while constructing or deserializing
    #[darling(default)]
    pub readonly: bool,

    #[darling(default)]
    pub transient: bool,

    /// Collection elements may be null
    #[darling(default)]
    pub nullable: bool,

    /// Changes are not announced to subscribers
    #[darling(default)]
    pub strict: bool,

    #[darling(default)]
    pub deprecated: bool,

    /// Compute function of a linked property, e.g. `linked = "Self::total"`
    #[darling(default)]
    pub linked: Option<Path>,

    /// Comma-separated dependency paths of a linked property
    #[darling(default)]
    pub depends_on: Option<String>,
}

impl DataFieldArgs {
    /// Check if this is the object id field
    pub fn is_id_field(&self) -> bool {
        self.ident.as_ref().map(|i| i == "id").unwrap_or(false)
    }

    /// Property name: the field name without a leading underscore
    pub fn property_name(&self) -> Option<String> {
        let ident = self.ident.as_ref()?.to_string();
        Some(ident.strip_prefix('_').unwrap_or(&ident).to_string())
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.depends_on
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parse a DeriveInput into DataClassArgs
pub fn parse_data_class(input: &syn::DeriveInput) -> darling::Result<DataClassArgs> {
    DataClassArgs::from_derive_input(input)
}
