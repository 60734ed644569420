use datarepo::prelude::*;

#[derive(Debug, Clone, Entity)]
#[entity(name = "Member", table = "members")]
pub struct Member {
    #[id]
    pub id: Option<i64>,
    #[column(name = "user_name")]
    pub username: String,
    pub age: i32,
    pub nickname: Option<String>,
    #[many_to_one(column = "team_id", fetch = "eager")]
    pub team: Related<Team>,
    #[transient]
    pub dirty: bool,
}

#[derive(Debug, Clone, Entity)]
pub struct Team {
    #[id]
    pub id: Option<i64>,
    pub name: String,
    #[one_to_many(mapped_by = "team")]
    pub members: RelatedMany<Member>,
}

fn main() {
    let meta = <Member as datarepo::data::Entity>::meta();
    assert_eq!(meta.table, "members");
    assert_eq!(meta.attributes[1].column, "user_name");
    assert!(meta.attributes[3].nullable);
    assert_eq!(<Team as datarepo::data::Entity>::meta().table, "team");
}
