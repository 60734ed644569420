use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use crate::crate_path::data_path;
use crate::types::named_fields;

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match generate(&input) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Name matched against constructor expressions: `#[projection(name = "...")]`
/// or the type name.
fn projection_name(input: &DeriveInput) -> syn::Result<String> {
    let mut name = None;
    for attr in &input.attrs {
        if attr.path().is_ident("projection") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    name = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `name` in #[projection(name = \"...\")]"))
                }
            })?;
        }
    }
    Ok(name.unwrap_or_else(|| input.ident.to_string()))
}

fn generate(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let data = data_path();
    let ident = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&input.generics, "#[derive(Projection)] does not support generic structs"));
    }
    let name = projection_name(input)?;
    let fields = named_fields(input, "Projection")?;
    if fields.is_empty() {
        return Err(syn::Error::new_spanned(ident, "#[derive(Projection)] requires at least one field"));
    }

    let mut field_names = Vec::new();
    let mut inits = Vec::new();
    for field in fields {
        let Some(field_ident) = &field.ident else {
            continue;
        };
        let field_name = field_ident.to_string();
        let ty = &field.ty;
        inits.push(quote! {
            #field_ident: <#ty as #data::FromValue>::from_value(
                &values.next().unwrap_or(#data::Value::Null),
                #field_name,
            )?,
        });
        field_names.push(field_name);
    }
    let width = field_names.len();

    Ok(quote! {
        impl #data::shape::Projection for #ident {
            const NAME: &'static str = #name;
            const FIELDS: &'static [&'static str] = &[#(#field_names),*];

            fn from_values(
                values: ::std::vec::Vec<#data::Value>,
            ) -> ::core::result::Result<Self, #data::DataError> {
                if values.len() != #width {
                    return ::core::result::Result::Err(#data::DataError::Other(::std::format!(
                        "{} expects {} columns, row has {}",
                        #name,
                        #width,
                        values.len()
                    )));
                }
                let mut values = values.into_iter();
                ::core::result::Result::Ok(Self {
                    #(#inits)*
                })
            }
        }
    })
}
