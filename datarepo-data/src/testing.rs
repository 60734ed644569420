//! Hand-mapped entities shared by the unit tests.

use crate::entity::{Attribute, Entity, EntityMeta, FetchType, FetchedRecords, Record, Relation, RelationKind};
use crate::error::DataError;
use crate::related::{Related, RelatedMany};
use crate::value::{Value, ValueKind};

pub static MEMBER_META: EntityMeta = EntityMeta {
    name: "Member",
    table: "member",
    id: "id",
    attributes: &[
        Attribute { name: "id", column: "id", kind: ValueKind::Int, nullable: false },
        Attribute { name: "username", column: "username", kind: ValueKind::Text, nullable: false },
        Attribute { name: "age", column: "age", kind: ValueKind::Int, nullable: false },
    ],
    relations: &[Relation {
        name: "team",
        kind: RelationKind::ManyToOne,
        target: <Team as Entity>::meta,
        column: "team_id",
        mapped_by: "",
        fetch: FetchType::Lazy,
    }],
};

pub static TEAM_META: EntityMeta = EntityMeta {
    name: "Team",
    table: "team",
    id: "id",
    attributes: &[
        Attribute { name: "id", column: "id", kind: ValueKind::Int, nullable: false },
        Attribute { name: "name", column: "name", kind: ValueKind::Text, nullable: false },
    ],
    relations: &[Relation {
        name: "members",
        kind: RelationKind::OneToMany,
        target: <Member as Entity>::meta,
        column: "",
        mapped_by: "team",
        fetch: FetchType::Lazy,
    }],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: Option<i64>,
    pub username: String,
    pub age: i32,
    pub team: Related<Team>,
}

impl Member {
    pub fn new(username: &str, age: i32) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            age,
            team: Related::Empty,
        }
    }

    pub fn with_team(mut self, team: &Team) -> Self {
        self.team = Related::new(team.clone());
        self
    }
}

impl Entity for Member {
    type Id = i64;

    fn meta() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("username", &self.username)
            .with("age", self.age)
            .with("team_id", self.team.key())
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.get_as("id")?,
            username: record.get_as("username")?,
            age: record.get_as("age")?,
            team: Related::from_key(record.get("team_id").clone()),
        })
    }

    fn attach(&mut self, relation: &str, fetched: FetchedRecords) -> Result<(), DataError> {
        match relation {
            "team" => self.team.attach(fetched),
            other => Err(DataError::Other(format!("Member has no relation '{other}'"))),
        }
    }

    fn transient_relation(&self) -> Option<&'static str> {
        self.team.is_transient().then_some("team")
    }
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub members: RelatedMany<Member>,
}

impl Team {
    pub fn named(id: Option<i64>, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            members: RelatedMany::default(),
        }
    }
}

impl Entity for Team {
    type Id = i64;

    fn meta() -> &'static EntityMeta {
        &TEAM_META
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("name", &self.name)
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        let id: Option<i64> = record.get_as("id")?;
        Ok(Self {
            id,
            name: record.get_as("name")?,
            members: RelatedMany::unresolved(Value::from(id), &TEAM_META.relations[0]),
        })
    }

    fn attach(&mut self, relation: &str, fetched: FetchedRecords) -> Result<(), DataError> {
        match relation {
            "members" => self.members.attach(fetched),
            other => Err(DataError::Other(format!("Team has no relation '{other}'"))),
        }
    }
}

/// Projection used by constructor-expression tests.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: String,
}

impl crate::shape::Projection for MemberDto {
    const NAME: &'static str = "MemberDto";
    const FIELDS: &'static [&'static str] = &["id", "username", "team_name"];

    fn from_values(values: Vec<Value>) -> Result<Self, DataError> {
        let mut it = values.into_iter();
        let mut next = |column: &str| -> Result<Value, DataError> {
            it.next()
                .ok_or_else(|| DataError::Other(format!("missing column {column}")))
        };
        Ok(Self {
            id: crate::value::FromValue::from_value(&next("id")?, "id")?,
            username: crate::value::FromValue::from_value(&next("username")?, "username")?,
            team_name: crate::value::FromValue::from_value(&next("team_name")?, "team_name")?,
        })
    }
}
