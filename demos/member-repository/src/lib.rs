//! Member/Team domain with typed repositories over the datarepo layer.

use datarepo::data::{
    args, Args, Direction, EntityCatalog, EntityRepository, Method, Modifying, Page, Pageable, RegistrationError,
    RepositoryDefinition, Returns, Slice, Sort, StorageBackend, UnitOfWork,
};
use datarepo::data::{DataError, Related, RelatedMany};
use datarepo::{DataSettings, Entity, Projection, StorageKind};
use std::ops::Deref;

#[derive(Debug, Clone, PartialEq, Entity)]
pub struct Member {
    #[id]
    pub id: Option<i64>,
    pub username: String,
    pub age: i32,
    #[many_to_one(column = "team_id")]
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

#[derive(Debug, Clone, PartialEq, Entity)]
pub struct Team {
    #[id]
    pub id: Option<i64>,
    pub name: String,
    #[one_to_many(mapped_by = "team")]
    pub members: RelatedMany<Member>,
}

impl Team {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            members: RelatedMany::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Projection)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: String,
}

/// Every entity of the domain; `Team` is reached through `Member.team`.
pub fn catalog() -> Result<EntityCatalog, RegistrationError> {
    EntityCatalog::new().with::<Member>()
}

/// Repository for [`Member`]. CRUD comes from the wrapped
/// [`EntityRepository`] through `Deref`.
#[derive(Debug, Clone)]
pub struct MemberRepository {
    inner: EntityRepository<Member>,
}

impl Deref for MemberRepository {
    type Target = EntityRepository<Member>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl MemberRepository {
    pub fn new(catalog: &EntityCatalog, settings: &DataSettings) -> Result<Self, RegistrationError> {
        let inner = RepositoryDefinition::<Member>::new()
            .max_page_size(settings.max_page_size)
            .method(Method::derived("findByUsernameAndAgeGreaterThan"))
            .method(Method::derived("findTop3HelloBy"))
            .method(Method::derived("findByUsername"))
            .method(
                Method::query("findUser", "select m from Member m where m.username = :username and m.age = :age")
                    .params(["username", "age"]),
            )
            .method(Method::query("findUsernameList", "select m.username from Member m"))
            .method(
                Method::query(
                    "findMemberDto",
                    "select new study.datajpa.repository.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
                )
                .projection::<MemberDto>(),
            )
            .method(
                Method::query("findMembers", "select m from Member m where m.username = :name")
                    .params(["name"])
                    .returns(Returns::One),
            )
            .method(
                Method::query("findByNames", "select m from Member m where m.username in :names").params(["names"]),
            )
            .method(Method::derived("findListByUsername"))
            .method(Method::derived("findMemberByUsername").returns(Returns::One))
            .method(Method::derived("findOptionalByUsername").returns(Returns::Optional))
            .method(Method::derived("findPageByUsername").returns(Returns::Page))
            .method(Method::derived("findSliceByUsername").returns(Returns::Slice))
            .method(Method::derived("findByAge").returns(Returns::Page))
            .method(
                Method::query("findMemberAllCountBy", "select m from Member m")
                    .count_query("select count(m.username) from Member m")
                    .returns(Returns::Page),
            )
            .method(
                Method::query("bulkAgePlus", "update Member m set m.age = m.age + 1 where m.age >= :age")
                    .params(["age"])
                    .modifying(Modifying::clearing()),
            )
            .method(Method::query("findMemberFetchJoin", "select m from Member m join fetch m.team"))
            .method(Method::derived("findAll").entity_graph(["team"]))
            .method(Method::query("findMemberEntityGraph", "select m from Member m").entity_graph(["team"]))
            .method(Method::derived("findEntityGraphByUsername").entity_graph(["team"]))
            .method(
                Method::derived("findReadOnlyByUsername")
                    .read_only()
                    .returns(Returns::One),
            )
            .build(catalog)?;
        Ok(Self { inner })
    }

    pub async fn find_by_username_and_age_greater_than(
        &self,
        uow: &mut UnitOfWork,
        username: &str,
        age: i32,
    ) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findByUsernameAndAgeGreaterThan", args![username, age]).await
    }

    pub async fn find_top3_hello_by(&self, uow: &mut UnitOfWork) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findTop3HelloBy", args![]).await
    }

    pub async fn find_by_username(&self, uow: &mut UnitOfWork, username: &str) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findByUsername", args![username]).await
    }

    pub async fn find_user(&self, uow: &mut UnitOfWork, username: &str, age: i32) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findUser", args![username, age]).await
    }

    pub async fn find_username_list(&self, uow: &mut UnitOfWork) -> Result<Vec<String>, DataError> {
        self.scalar_list(uow, "findUsernameList", args![]).await
    }

    pub async fn find_member_dto(&self, uow: &mut UnitOfWork) -> Result<Vec<MemberDto>, DataError> {
        self.project_list(uow, "findMemberDto", args![]).await
    }

    pub async fn find_members(&self, uow: &mut UnitOfWork, username: &str) -> Result<Member, DataError> {
        self.find_one(uow, "findMembers", args![username]).await
    }

    pub async fn find_by_names(&self, uow: &mut UnitOfWork, names: &[&str]) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findByNames", args![names.to_vec()]).await
    }

    pub async fn find_list_by_username(&self, uow: &mut UnitOfWork, name: &str) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findListByUsername", args![name]).await
    }

    /// Windowed list; no count query runs.
    pub async fn find_list_by_username_paged(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        pageable: Pageable,
    ) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findListByUsername", args![name].with_pageable(pageable)).await
    }

    pub async fn find_list_by_username_sorted(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        sort: Sort,
    ) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findListByUsername", args![name].with_sort(sort)).await
    }

    pub async fn find_member_by_username(&self, uow: &mut UnitOfWork, name: &str) -> Result<Member, DataError> {
        self.find_one(uow, "findMemberByUsername", args![name]).await
    }

    pub async fn find_optional_by_username(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
    ) -> Result<Option<Member>, DataError> {
        self.find_optional(uow, "findOptionalByUsername", args![name]).await
    }

    pub async fn find_page_by_username(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        pageable: Pageable,
    ) -> Result<Page<Member>, DataError> {
        self.find_page(uow, "findPageByUsername", args![name].with_pageable(pageable)).await
    }

    pub async fn find_slice_by_username(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        pageable: Pageable,
    ) -> Result<Slice<Member>, DataError> {
        self.find_slice(uow, "findSliceByUsername", args![name].with_pageable(pageable)).await
    }

    pub async fn find_by_age(&self, uow: &mut UnitOfWork, age: i32, pageable: Pageable) -> Result<Page<Member>, DataError> {
        self.find_page(uow, "findByAge", args![age].with_pageable(pageable)).await
    }

    pub async fn find_member_all_count_by(
        &self,
        uow: &mut UnitOfWork,
        pageable: Pageable,
    ) -> Result<Page<Member>, DataError> {
        self.find_page(uow, "findMemberAllCountBy", Args::new().with_pageable(pageable)).await
    }

    /// Adds one year to every member aged `age` or more and clears the
    /// identity map.
    pub async fn bulk_age_plus(&self, uow: &mut UnitOfWork, age: i32) -> Result<u64, DataError> {
        self.execute(uow, "bulkAgePlus", args![age]).await
    }

    pub async fn find_member_fetch_join(&self, uow: &mut UnitOfWork) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findMemberFetchJoin", args![]).await
    }

    pub async fn find_member_entity_graph(&self, uow: &mut UnitOfWork) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findMemberEntityGraph", args![]).await
    }

    pub async fn find_entity_graph_by_username(
        &self,
        uow: &mut UnitOfWork,
        username: &str,
    ) -> Result<Vec<Member>, DataError> {
        self.find_list(uow, "findEntityGraphByUsername", args![username]).await
    }

    pub async fn find_read_only_by_username(&self, uow: &mut UnitOfWork, username: &str) -> Result<Member, DataError> {
        self.find_one(uow, "findReadOnlyByUsername", args![username]).await
    }
}

/// Repository for [`Team`]: CRUD only.
#[derive(Debug, Clone)]
pub struct TeamRepository {
    inner: EntityRepository<Team>,
}

impl Deref for TeamRepository {
    type Target = EntityRepository<Team>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TeamRepository {
    pub fn new(catalog: &EntityCatalog, settings: &DataSettings) -> Result<Self, RegistrationError> {
        let inner = RepositoryDefinition::<Team>::new()
            .max_page_size(settings.max_page_size)
            .build(catalog)?;
        Ok(Self { inner })
    }
}

/// The backend selected by `data.backend`, schema created.
pub async fn open_backend(
    settings: &DataSettings,
    catalog: &EntityCatalog,
) -> Result<Box<dyn StorageBackend>, DataError> {
    match settings.backend {
        StorageKind::Memory => Ok(Box::new(datarepo::data::MemoryBackend::new())),
        StorageKind::Sqlite => {
            let backend = datarepo::sqlx_backend::SqliteBackend::from_settings(settings).await?;
            backend.create_schema(catalog).await?;
            Ok(Box::new(backend))
        }
    }
}

/// First page of `size` members sorted by username, newest names first.
pub fn username_desc(page: u64, size: u64) -> Pageable {
    Pageable::sorted(page, size, Sort::by(Direction::Desc, &["username"]))
}
