//! Procedural macros for the docmodel project.
//!
//! This crate provides `#[derive(Shape)]`, which describes the field tree of a
//! struct so a model can hand out field descriptors for it. Field names follow the
//! struct's serde attributes (`rename`, `rename_all`, `skip`, `flatten`), so the
//! descriptors match the serialized documents.

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Fields, LitStr, Token, meta::ParseNestedMeta, parse_macro_input,
    parse_quote,
};

/// Derives `docmodel::fields::HasShape` for a struct with named fields.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Shape)]
/// #[serde(rename_all = "camelCase")]
/// struct User {
///     id: String,
///     display_name: String,
///     address: Address,
/// }
///
/// // fields: id, displayName, address, address.city, ...
/// ```
#[proc_macro_derive(Shape)]
pub fn derive_shape(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct SerdeOptions {
    rename: Option<String>,
    rename_all: Option<String>,
    skip: bool,
    flatten: bool,
}

fn expand(mut input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let container = serde_options(&input.attrs)?;

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(&input.ident, "Shape can only be derived for structs"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(&input.ident, "Shape requires named fields"));
    };

    let mut entries = Vec::new();
    for field in &named.named {
        let options = serde_options(&field.attrs)?;
        if options.skip {
            continue;
        }

        let ty = &field.ty;
        if options.flatten {
            entries.push(quote! {
                if let ::docmodel::fields::Shape::Object(inner) =
                    <#ty as ::docmodel::fields::HasShape>::shape()
                {
                    fields.extend(inner);
                }
            });
            continue;
        }

        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let raw = ident.to_string();
        let raw = raw.strip_prefix("r#").unwrap_or(&raw);
        let key = match (&options.rename, &container.rename_all) {
            (Some(rename), _) => rename.clone(),
            (None, Some(rule)) => apply_rename_rule(raw, rule)
                .ok_or_else(|| syn::Error::new_spanned(ident, format!("unsupported rename_all rule \"{rule}\"")))?,
            (None, None) => raw.to_string(),
        };

        entries.push(quote! {
            fields.push((
                ::std::string::String::from(#key),
                <#ty as ::docmodel::fields::HasShape>::shape(),
            ));
        });
    }

    let type_params = input
        .generics
        .type_params()
        .map(|param| param.ident.clone())
        .collect::<Vec<_>>();
    let where_clause = input.generics.make_where_clause();
    for param in type_params {
        where_clause
            .predicates
            .push(parse_quote!(#param: ::docmodel::fields::HasShape));
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::docmodel::fields::HasShape for #name #ty_generics #where_clause {
            fn shape() -> ::docmodel::fields::Shape {
                #[allow(unused_mut)]
                let mut fields = ::std::vec::Vec::new();
                #(#entries)*
                ::docmodel::fields::Shape::Object(fields)
            }
        }
    })
}

/// Reads the serde attributes that affect field names.
fn serde_options(attrs: &[Attribute]) -> syn::Result<SerdeOptions> {
    let mut options = SerdeOptions::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                options.rename = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("rename_all") && meta.input.peek(Token![=]) {
                options.rename_all = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                options.skip = true;
            } else if meta.path.is_ident("flatten") {
                options.flatten = true;
            } else {
                skip_meta(&meta)?;
            }

            Ok(())
        })?;
    }

    Ok(options)
}

/// Consumes the value of an attribute this macro does not interpret.
fn skip_meta(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        content.parse::<proc_macro2::TokenStream>()?;
    }

    Ok(())
}

/// Applies a serde `rename_all` rule to a snake_case field name.
fn apply_rename_rule(name: &str, rule: &str) -> Option<String> {
    let words = name.split('_').filter(|word| !word.is_empty());

    Some(match rule {
        "lowercase" => name.to_lowercase(),
        "UPPERCASE" => name.to_uppercase(),
        "snake_case" => name.to_string(),
        "SCREAMING_SNAKE_CASE" => name.to_uppercase(),
        "kebab-case" => name.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => name.replace('_', "-").to_uppercase(),
        "PascalCase" => words.map(capitalize).collect(),
        "camelCase" => {
            let pascal = words.map(capitalize).collect::<String>();
            let mut chars = pascal.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        _ => return None,
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
