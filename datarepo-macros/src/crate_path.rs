//! Crate path resolution for generated code.
//!
//! Detects whether the user depends on `datarepo` (facade) or
//! `datarepo-data` directly, and returns the matching path prefix.

use proc_macro2::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;

fn ident_path(name: &str) -> TokenStream {
    let ident = syn::Ident::new(name, proc_macro2::Span::call_site());
    quote!(::#ident)
}

/// Path to the `datarepo_data` items: `::datarepo::data` through the facade,
/// `::datarepo_data` otherwise.
pub fn data_path() -> TokenStream {
    if let Ok(found) = crate_name("datarepo") {
        match found {
            FoundCrate::Itself => quote!(crate::data),
            FoundCrate::Name(name) => {
                let root = ident_path(&name);
                quote!(#root::data)
            }
        }
    } else if let Ok(found) = crate_name("datarepo-data") {
        match found {
            FoundCrate::Itself => quote!(crate),
            FoundCrate::Name(name) => ident_path(&name),
        }
    } else {
        // Fallback so the error names a real crate.
        quote!(::datarepo_data)
    }
}
