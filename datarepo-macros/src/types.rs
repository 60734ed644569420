//! Type inspection helpers shared by the derives.

/// The single generic argument of `Wrapper<T>` when the last path segment is
/// `wrapper` (`Option`, `Related`, `RelatedMany`).
pub fn generic_arg<'a>(ty: &'a syn::Type, wrapper: &str) -> Option<&'a syn::Type> {
    let syn::Type::Path(syn::TypePath { path, .. }) = ty else {
        return None;
    };
    let segment = path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(syn::GenericArgument::Type(inner)) => Some(inner),
        _ => None,
    }
}

/// `TeamMember` → `team_member`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Named fields of a struct, or an error pointing at `input`.
pub fn named_fields<'a>(input: &'a syn::DeriveInput, derive: &str) -> syn::Result<Vec<&'a syn::Field>> {
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => Ok(named.named.iter().collect()),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                format!("#[derive({derive})] requires a struct with named fields"),
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            format!("#[derive({derive})] can only be used on structs"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_type_names() {
        assert_eq!(snake_case("Member"), "member");
        assert_eq!(snake_case("TeamMember"), "team_member");
    }

    #[test]
    fn finds_wrapped_types() {
        let ty: syn::Type = syn::parse_quote!(Option<i64>);
        assert!(generic_arg(&ty, "Option").is_some());
        assert!(generic_arg(&ty, "Related").is_none());
        let ty: syn::Type = syn::parse_quote!(datarepo::Related<Team>);
        assert!(generic_arg(&ty, "Related").is_some());
    }
}
