use datarepo::prelude::*;

#[derive(Debug, Projection)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: Option<String>,
}

#[derive(Debug, Projection)]
#[projection(name = "UsernameOnly")]
pub struct Username {
    pub username: String,
}

fn main() {
    assert_eq!(<MemberDto as datarepo::data::Projection>::FIELDS, &["id", "username", "team_name"]);
    assert_eq!(<Username as datarepo::data::Projection>::NAME, "UsernameOnly");
}
