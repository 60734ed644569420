use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use crate::crate_path::data_path;
use crate::types::{generic_arg, named_fields, snake_case};

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match generate(&input) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// `#[entity(name = "...", table = "...")]` on the struct.
struct EntityAttr {
    name: String,
    table: String,
}

fn extract_entity_attr(input: &DeriveInput) -> syn::Result<EntityAttr> {
    let type_name = input.ident.to_string();
    let mut name = None;
    let mut table = None;
    for attr in &input.attrs {
        if attr.path().is_ident("entity") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    name = Some(lit.value());
                    Ok(())
                } else if meta.path.is_ident("table") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    table = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `name` or `table` in #[entity(...)]"))
                }
            })?;
        }
    }
    Ok(EntityAttr {
        table: table.unwrap_or_else(|| snake_case(&type_name)),
        name: name.unwrap_or(type_name),
    })
}

enum FieldRole {
    Id { inner: syn::Type },
    Column,
    ManyToOne { column: String, eager: bool },
    OneToMany { mapped_by: String, eager: bool },
    Transient,
}

struct FieldInfo {
    ident: syn::Ident,
    ty: syn::Type,
    column: String,
    role: FieldRole,
}

fn parse_fetch(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<bool> {
    let lit: syn::LitStr = meta.value()?.parse()?;
    match lit.value().as_str() {
        "lazy" => Ok(false),
        "eager" => Ok(true),
        _ => Err(syn::Error::new_spanned(lit, "fetch must be \"lazy\" or \"eager\"")),
    }
}

fn parse_field(field: &syn::Field) -> syn::Result<FieldInfo> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
    let field_name = ident.to_string();
    let mut column = None;
    let mut role = None;

    let set_role = |role_slot: &mut Option<FieldRole>, attr: &syn::Attribute, value: FieldRole| {
        if role_slot.is_some() {
            return Err(syn::Error::new_spanned(
                attr,
                "a field takes only one of #[id], #[many_to_one], #[one_to_many], #[transient]",
            ));
        }
        *role_slot = Some(value);
        Ok(())
    };

    for attr in &field.attrs {
        if attr.path().is_ident("id") {
            let inner = generic_arg(&field.ty, "Option").cloned().ok_or_else(|| {
                syn::Error::new_spanned(&field.ty, "#[id] field must be an Option<_>; None marks a new entity")
            })?;
            set_role(&mut role, attr, FieldRole::Id { inner })?;
        } else if attr.path().is_ident("transient") {
            set_role(&mut role, attr, FieldRole::Transient)?;
        } else if attr.path().is_ident("column") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    column = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("expected `name` in #[column(...)]"))
                }
            })?;
        } else if attr.path().is_ident("many_to_one") {
            if generic_arg(&field.ty, "Related").is_none() {
                return Err(syn::Error::new_spanned(&field.ty, "#[many_to_one] field must be a Related<_>"));
            }
            let mut fk = None;
            let mut eager = false;
            if !matches!(attr.meta, syn::Meta::Path(_)) {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("column") {
                        let lit: syn::LitStr = meta.value()?.parse()?;
                        fk = Some(lit.value());
                        Ok(())
                    } else if meta.path.is_ident("fetch") {
                        eager = parse_fetch(&meta)?;
                        Ok(())
                    } else {
                        Err(meta.error("expected `column` or `fetch` in #[many_to_one(...)]"))
                    }
                })?;
            }
            let column = fk.unwrap_or_else(|| format!("{field_name}_id"));
            set_role(&mut role, attr, FieldRole::ManyToOne { column, eager })?;
        } else if attr.path().is_ident("one_to_many") {
            if generic_arg(&field.ty, "RelatedMany").is_none() {
                return Err(syn::Error::new_spanned(&field.ty, "#[one_to_many] field must be a RelatedMany<_>"));
            }
            let mut mapped_by = None;
            let mut eager = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("mapped_by") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    mapped_by = Some(lit.value());
                    Ok(())
                } else if meta.path.is_ident("fetch") {
                    eager = parse_fetch(&meta)?;
                    Ok(())
                } else {
                    Err(meta.error("expected `mapped_by` or `fetch` in #[one_to_many(...)]"))
                }
            })?;
            let mapped_by = mapped_by.ok_or_else(|| {
                syn::Error::new_spanned(attr, "#[one_to_many] requires mapped_by = \"<inverse field>\"")
            })?;
            set_role(&mut role, attr, FieldRole::OneToMany { mapped_by, eager })?;
        }
    }

    let role = role.unwrap_or(FieldRole::Column);
    if column.is_some() && !matches!(role, FieldRole::Id { .. } | FieldRole::Column) {
        return Err(syn::Error::new_spanned(
            &ident,
            "#[column] applies to attributes; use #[many_to_one(column = \"...\")] for foreign keys",
        ));
    }
    Ok(FieldInfo {
        column: column.unwrap_or_else(|| field_name.clone()),
        ident,
        ty: field.ty.clone(),
        role,
    })
}

fn fetch_tokens(data: &TokenStream2, eager: bool) -> TokenStream2 {
    if eager {
        quote!(#data::FetchType::Eager)
    } else {
        quote!(#data::FetchType::Lazy)
    }
}

fn generate(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let data = data_path();
    let name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&input.generics, "#[derive(Entity)] does not support generic structs"));
    }
    let entity = extract_entity_attr(input)?;
    let fields = named_fields(input, "Entity")?
        .into_iter()
        .map(parse_field)
        .collect::<syn::Result<Vec<_>>>()?;

    let mut ids = fields.iter().filter(|f| matches!(f.role, FieldRole::Id { .. }));
    let id = match (ids.next(), ids.next()) {
        (Some(id), None) => id,
        (None, _) => {
            return Err(syn::Error::new_spanned(name, "#[derive(Entity)] requires exactly one #[id] field"));
        }
        (Some(_), Some(second)) => {
            return Err(syn::Error::new_spanned(&second.ident, "duplicate #[id] field"));
        }
    };
    let id_ident = &id.ident;
    let id_column = &id.column;
    let id_name = id.ident.to_string();
    let id_type = match &id.role {
        FieldRole::Id { inner } => inner,
        _ => return Err(syn::Error::new_spanned(&id.ident, "expected an #[id] field")),
    };

    let entity_name = &entity.name;
    let table = &entity.table;

    let mut attributes = Vec::new();
    let mut relations = Vec::new();
    let mut to_record = Vec::new();
    let mut from_record = Vec::new();
    let mut attach_arms = Vec::new();
    let mut transient_checks = Vec::new();

    for field in &fields {
        let ident = &field.ident;
        let ty = &field.ty;
        let field_name = ident.to_string();
        match &field.role {
            FieldRole::Id { .. } | FieldRole::Column => {
                let column = &field.column;
                let nullable = if matches!(field.role, FieldRole::Id { .. }) {
                    quote!(false)
                } else {
                    quote!(<#ty as #data::ValueType>::NULLABLE)
                };
                attributes.push(quote! {
                    #data::Attribute {
                        name: #field_name,
                        column: #column,
                        kind: <#ty as #data::ValueType>::KIND,
                        nullable: #nullable,
                    }
                });
                to_record.push(quote! {
                    record.insert(#column, ::core::clone::Clone::clone(&self.#ident));
                });
                from_record.push(quote! { #ident: record.get_as(#column)?, });
            }
            FieldRole::ManyToOne { column, eager } => {
                let fetch = fetch_tokens(&data, *eager);
                relations.push(quote! {
                    #data::Relation {
                        name: #field_name,
                        kind: #data::RelationKind::ManyToOne,
                        target: <<#ty as #data::related::RelationField>::Target as #data::Entity>::meta,
                        column: #column,
                        mapped_by: "",
                        fetch: #fetch,
                    }
                });
                to_record.push(quote! { record.insert(#column, self.#ident.key()); });
                from_record.push(quote! {
                    #ident: #data::Related::from_key(::core::clone::Clone::clone(record.get(#column))),
                });
                attach_arms.push(quote! { #field_name => self.#ident.attach(fetched), });
                transient_checks.push(quote! {
                    if self.#ident.is_transient() {
                        return ::core::option::Option::Some(#field_name);
                    }
                });
            }
            FieldRole::OneToMany { mapped_by, eager } => {
                let fetch = fetch_tokens(&data, *eager);
                let index = relations.len();
                relations.push(quote! {
                    #data::Relation {
                        name: #field_name,
                        kind: #data::RelationKind::OneToMany,
                        target: <<#ty as #data::related::RelationField>::Target as #data::Entity>::meta,
                        column: "",
                        mapped_by: #mapped_by,
                        fetch: #fetch,
                    }
                });
                from_record.push(quote! {
                    #ident: #data::RelatedMany::unresolved(
                        ::core::clone::Clone::clone(record.get(#id_column)),
                        &<Self as #data::Entity>::meta().relations[#index],
                    ),
                });
                attach_arms.push(quote! { #field_name => self.#ident.attach(fetched), });
            }
            FieldRole::Transient => {
                from_record.push(quote! { #ident: ::core::default::Default::default(), });
            }
        }
    }

    Ok(quote! {
        impl #data::Entity for #name {
            type Id = #id_type;

            fn meta() -> &'static #data::EntityMeta {
                static META: #data::EntityMeta = #data::EntityMeta {
                    name: #entity_name,
                    table: #table,
                    id: #id_name,
                    attributes: &[#(#attributes),*],
                    relations: &[#(#relations),*],
                };
                &META
            }

            fn id(&self) -> ::core::option::Option<#id_type> {
                ::core::clone::Clone::clone(&self.#id_ident)
            }

            fn set_id(&mut self, id: #id_type) {
                self.#id_ident = ::core::option::Option::Some(id);
            }

            fn to_record(&self) -> #data::Record {
                let mut record = #data::Record::new();
                #(#to_record)*
                record
            }

            fn from_record(record: &#data::Record) -> ::core::result::Result<Self, #data::DataError> {
                ::core::result::Result::Ok(Self {
                    #(#from_record)*
                })
            }

            fn attach(
                &mut self,
                relation: &str,
                fetched: #data::FetchedRecords,
            ) -> ::core::result::Result<(), #data::DataError> {
                let _ = &fetched;
                match relation {
                    #(#attach_arms)*
                    other => ::core::result::Result::Err(#data::DataError::Other(
                        ::std::format!("{} has no relation '{}'", #entity_name, other),
                    )),
                }
            }

            fn transient_relation(&self) -> ::core::option::Option<&'static str> {
                #(#transient_checks)*
                ::core::option::Option::None
            }
        }
    })
}
