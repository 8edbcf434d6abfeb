//! DataClass derive macro implementation

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{GenericArgument, PathArguments, Type};

use crate::parse::{parse_data_class, DataClassArgs, DataFieldArgs};

/// FNV-1a 32-bit hash (compile-time computation in proc macro)
const fn fnv1a_32(data: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;

    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Extract the inner type from `PhantomData<T>` if present, otherwise return the type as-is
fn extract_inner_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "PhantomData" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

/// Check if a type is PhantomData
fn is_phantom_data(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "PhantomData";
        }
    }
    false
}

/// Generate the DataClass implementation
pub fn derive_data_class(input: syn::DeriveInput) -> TokenStream {
    match parse_data_class(&input) {
        Ok(args) => generate_impl(args),
        Err(e) => e.write_errors(),
    }
}

fn generate_impl(args: DataClassArgs) -> TokenStream {
    let type_name = args.type_name();
    let struct_name = &args.ident;
    let vis = &args.vis;

    // Get fields
    let fields = match &args.data {
        darling::ast::Data::Struct(fields) => &fields.fields,
        _ => {
            return syn::Error::new_spanned(&args.ident, "DataClass can only be derived for structs")
                .to_compile_error()
        }
    };

    if !fields.iter().any(DataFieldArgs::is_id_field) {
        return syn::Error::new_spanned(
            &args.ident,
            "DataClass requires an `id: ObjectId` field",
        )
        .to_compile_error();
    }

    let properties: Vec<&DataFieldArgs> = fields.iter().filter(|f| !f.is_id_field()).collect();
    for field in &properties {
        if let Err(e) = check_field(field) {
            return e.to_compile_error();
        }
    }

    let type_hash = fnv1a_32(type_name.as_bytes());

    let constants: Vec<_> = properties
        .iter()
        .enumerate()
        .map(|(index, f)| generate_constant(vis, &type_name, index, f))
        .collect();

    let accessors: Vec<_> = properties
        .iter()
        .map(|f| generate_accessors(vis, f))
        .collect();

    let declarations: Vec<_> = properties.iter().map(|f| generate_declaration(f)).collect();

    let field_inits: Vec<_> = properties
        .iter()
        .filter_map(|f| {
            let ident = f.ident.as_ref()?;
            if is_phantom_data(&f.ty) {
                Some(quote! { #ident: ::std::marker::PhantomData })
            } else {
                Some(quote! { #ident: ::std::default::Default::default() })
            }
        })
        .collect();

    let hash_doc = format!("FNV-1a hash of type name `{}`", type_name);

    quote! {
        impl #struct_name {
            #[doc = #hash_doc]
            #vis const TYPE_HASH: u32 = #type_hash;

            #(#constants)*

            /// Declare the type if needed and create a root instance
            #vis fn create(
                graph: &mut ::datatree_core::DataGraph,
            ) -> ::datatree_core::DataResult<Self> {
                graph.create_class::<Self>()
            }

            #(#accessors)*
        }

        impl ::datatree_core::schema::DataClass for #struct_name {
            const TYPE_NAME: &'static str = #type_name;

            fn declaration() -> ::datatree_core::schema::TypeDeclaration {
                ::datatree_core::schema::TypeDeclaration::new(#type_name)
                    #(.property(#declarations))*
            }

            fn from_id(id: ::datatree_core::ObjectId) -> Self {
                Self {
                    id,
                    #(#field_inits),*
                }
            }

            fn id(&self) -> ::datatree_core::ObjectId {
                self.id
            }
        }

        impl ::datatree_core::schema::PropertyValue for #struct_name {
            fn semantic_type() -> ::datatree_core::schema::SemanticType {
                ::datatree_core::schema::SemanticType::object(#type_name)
            }

            fn into_value(self) -> ::datatree_core::Value {
                ::datatree_core::Value::Object(self.id)
            }

            fn from_value(value: &::datatree_core::Value) -> ::std::option::Option<Self> {
                value
                    .as_object()
                    .map(<Self as ::datatree_core::schema::DataClass>::from_id)
            }

            fn declare_nested() {
                ::datatree_core::schema::registry::declare_class::<Self>();
            }
        }

        impl ::std::convert::From<#struct_name> for ::datatree_core::Value {
            fn from(object: #struct_name) -> Self {
                ::datatree_core::Value::Object(object.id)
            }
        }
    }
}

fn check_field(field: &DataFieldArgs) -> syn::Result<()> {
    if field.linked.is_none() && field.depends_on.is_some() {
        return Err(syn::Error::new_spanned(
            &field.ty,
            "`depends_on` requires `linked = \"compute_fn\"`",
        ));
    }
    if field.linked.is_some() && field.default.is_some() {
        return Err(syn::Error::new_spanned(
            &field.ty,
            "linked properties are computed and cannot have a default",
        ));
    }
    Ok(())
}

fn generate_constant(
    vis: &syn::Visibility,
    type_name: &str,
    index: usize,
    field: &DataFieldArgs,
) -> TokenStream {
    let name = field.property_name().unwrap_or_default();
    let field_ty = extract_inner_type(&field.ty);
    let const_name = format_ident!("{}", name.to_uppercase());
    let doc = format!("Typed token for property `{}`", name);

    quote! {
        #[doc = #doc]
        #vis const #const_name: ::datatree_core::Property<#field_ty> =
            ::datatree_core::Property::new(#type_name, #index, #name);
    }
}

fn generate_accessors(vis: &syn::Visibility, field: &DataFieldArgs) -> TokenStream {
    let name = field.property_name().unwrap_or_default();
    let field_ty = extract_inner_type(&field.ty);
    let const_name = format_ident!("{}", name.to_uppercase());
    let getter_name = format_ident!("{}", name);
    let setter_name = format_ident!("set_{}", name);

    let getter_doc = format!("Get the value of `{}`", name);
    let setter_doc = format!("Set the value of `{}`", name);

    let getter = quote! {
        #[doc = #getter_doc]
        #[inline]
        #vis fn #getter_name(
            &self,
            graph: &::datatree_core::DataGraph,
        ) -> ::datatree_core::DataResult<#field_ty> {
            Self::#const_name.get(graph, self.id)
        }
    };

    // Generate setter (unless readonly or computed)
    let setter = if field.readonly || field.linked.is_some() {
        quote! {}
    } else {
        quote! {
            #[doc = #setter_doc]
            #[inline]
            #vis fn #setter_name(
                &self,
                graph: &mut ::datatree_core::DataGraph,
                value: #field_ty,
            ) -> ::datatree_core::DataResult<()> {
                Self::#const_name.set(graph, self.id, value)
            }
        }
    };

    quote! {
        #getter
        #setter
    }
}

fn generate_declaration(field: &DataFieldArgs) -> TokenStream {
    let name = field.property_name().unwrap_or_default();
    let field_ty = extract_inner_type(&field.ty);

    let mut decl = quote! {
        ::datatree_core::schema::PropertyDeclaration::of::<#field_ty>(#name)
    };

    if let Some(key) = &field.key {
        decl = quote! { #decl.key(#key) };
    }
    if let Some(default) = &field.default {
        let expr = &default.0;
        decl = quote! { #decl.default(#expr) };
    }

    let flags = [
        (field.readonly, quote! { read_only }),
        (field.transient, quote! { transient }),
        (field.nullable, quote! { nullable }),
        (field.strict, quote! { strict }),
        (field.deprecated, quote! { deprecated }),
    ];
    for (set, method) in flags {
        if set {
            decl = quote! { #decl.#method() };
        }
    }

    if let Some(compute) = &field.linked {
        let deps = field.dependencies();
        decl = quote! {
            #decl.linked(&[#(#deps),*], |inputs| {
                (#compute)(inputs)
                    .map(<#field_ty as ::datatree_core::schema::PropertyValue>::into_value)
            })
        };
    }

    decl
}
