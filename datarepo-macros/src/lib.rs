extern crate proc_macro;
use proc_macro::TokenStream;

pub(crate) mod crate_path;
pub(crate) mod entity_derive;
pub(crate) mod projection_derive;
pub(crate) mod types;

/// Derive macro mapping a struct to a table.
///
/// # Struct-level attribute
///
/// | Parameter | Required | Description |
/// |-----------|----------|-------------|
/// | `name`    | no       | Entity name used in explicit queries (defaults to the type name) |
/// | `table`   | no       | Table name (defaults to the snake_case type name) |
///
/// # Field attributes
///
/// | Attribute | Description |
/// |-----------|-------------|
/// | `#[id]` | Identifier; the field must be `Option<_>`, `None` until persisted |
/// | `#[column(name = "...")]` | Column name of an attribute (defaults to the field name) |
/// | `#[many_to_one(column = "...", fetch = "lazy")]` | `Related<T>` field; the column defaults to `<field>_id` |
/// | `#[one_to_many(mapped_by = "...")]` | `RelatedMany<T>` field; `mapped_by` names the inverse many-to-one |
/// | `#[transient]` | Not mapped; filled with `Default::default()` on load |
///
/// Every other field is an attribute whose type implements `ValueType`,
/// `FromValue` and `Into<Value>`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Entity)]
/// pub struct Member {
///     #[id]
///     pub id: Option<i64>,
///     pub username: String,
///     pub age: i32,
///     #[many_to_one(column = "team_id")]
///     pub team: Related<Team>,
/// }
///
/// #[derive(Debug, Clone, Entity)]
/// pub struct Team {
///     #[id]
///     pub id: Option<i64>,
///     pub name: String,
///     #[one_to_many(mapped_by = "team")]
///     pub members: RelatedMany<Member>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, id, column, many_to_one, one_to_many, transient))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    entity_derive::expand(input)
}

/// Derive macro for read-only query shapes.
///
/// Columns are taken in field order. The projection name (the type name, or
/// `#[projection(name = "...")]`) is what `select new <Name>(...)` must use.
///
/// ```ignore
/// #[derive(Debug, Projection)]
/// pub struct MemberDto {
///     pub id: i64,
///     pub username: String,
///     pub team_name: String,
/// }
/// ```
#[proc_macro_derive(Projection, attributes(projection))]
pub fn derive_projection(input: TokenStream) -> TokenStream {
    projection_derive::expand(input)
}
