use datarepo_data::prelude::*;
use datarepo_data::Value;
use datarepo_data_sqlx::SqliteBackend;
use datarepo_macros::{Entity, Projection};

#[derive(Debug, Clone, Entity)]
pub struct Member {
    #[id]
    pub id: Option<i64>,
    pub username: String,
    pub age: i32,
    #[many_to_one(column = "team_id")]
    pub team: Related<Team>,
}

impl Member {
    fn new(username: &str, age: i32) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            age,
            team: Related::Empty,
        }
    }
}

#[derive(Debug, Clone, Entity)]
pub struct Team {
    #[id]
    pub id: Option<i64>,
    pub name: String,
    #[one_to_many(mapped_by = "team")]
    pub members: RelatedMany<Member>,
}

#[derive(Debug, Clone, PartialEq, Projection)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: String,
}

fn catalog() -> EntityCatalog {
    EntityCatalog::new().with::<Member>().unwrap()
}

fn members() -> EntityRepository<Member> {
    RepositoryDefinition::<Member>::new()
        .method(Method::derived("findByUsernameAndAgeGreaterThan"))
        .method(Method::derived("findByUsernameStartingWith"))
        .method(Method::derived("findByUsernameIgnoreCase"))
        .method(Method::derived("findByAge").returns(Returns::Page))
        .method(Method::derived("findByAgeOrderByUsernameDesc").returns(Returns::Slice))
        .method(
            Method::query(
                "findMemberDto",
                "select new MemberDto(m.id, m.username, t.name) from Member m join m.team t",
            )
            .projection::<MemberDto>(),
        )
        .method(
            Method::query("findByNames", "select m from Member m where m.username in :names")
                .params(["names"]),
        )
        .method(
            Method::query("bulkAgePlus", "update Member m set m.age = m.age + 1 where m.age >= :age")
                .params(["age"])
                .modifying(Modifying::clearing()),
        )
        .method(Method::query("findMemberFetchJoin", "select m from Member m left join fetch m.team"))
        .method(Method::derived("deleteByAgeLessThan"))
        .build(&catalog())
        .unwrap()
}

fn teams() -> EntityRepository<Team> {
    RepositoryDefinition::<Team>::new()
        .method(Method::query("findAllWithMembers", "select distinct t from Team t left join fetch t.members"))
        .build(&catalog())
        .unwrap()
}

async fn backend() -> SqliteBackend {
    let backend = SqliteBackend::connect("sqlite::memory:", 1).await.unwrap();
    backend.create_schema(&catalog()).await.unwrap();
    backend
}

async fn seed(backend: &SqliteBackend) {
    let mut uow = UnitOfWork::begin(backend).await.unwrap();
    let mut team_a = Team { id: None, name: "teamA".into(), members: RelatedMany::default() };
    let mut team_b = Team { id: None, name: "teamB".into(), members: RelatedMany::default() };
    uow.persist(&mut team_a).await.unwrap();
    uow.persist(&mut team_b).await.unwrap();
    for (name, age, team) in [
        ("member1", 10, Some(&team_a)),
        ("member2", 19, Some(&team_a)),
        ("member3", 20, Some(&team_b)),
        ("member4", 21, Some(&team_b)),
        ("member5", 40, None),
    ] {
        let mut member = Member::new(name, age);
        if let Some(team) = team {
            member.team = Related::new(team.clone());
        }
        uow.persist(&mut member).await.unwrap();
    }
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn crud_round_trip() {
    let backend = backend().await;
    let repo = members();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    let saved = repo.save(&mut uow, Member::new("memberA", 10)).await.unwrap();
    let id = saved.id.unwrap();
    uow.commit().await.unwrap();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    let found = repo.find_by_id(&mut uow, id).await.unwrap().unwrap();
    assert_eq!(found.username, "memberA");
    assert_eq!(found.age, 10);
    assert!(found.team.is_empty());
    assert_eq!(repo.count(&mut uow).await.unwrap(), 1);

    assert!(repo.delete_by_id(&mut uow, id).await.unwrap());
    assert!(!repo.exists_by_id(&mut uow, id).await.unwrap());
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn rollback_discards_writes() {
    let backend = backend().await;
    let repo = members();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    repo.save(&mut uow, Member::new("ghost", 1)).await.unwrap();
    uow.rollback().await.unwrap();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    assert_eq!(repo.count(&mut uow).await.unwrap(), 0);
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn derived_queries_and_case_sensitive_like() {
    let backend = backend().await;
    seed(&backend).await;
    let repo = members();
    let mut uow = UnitOfWork::begin(&backend).await.unwrap();

    let found = repo
        .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", args!["member4", 15])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].age, 21);

    let starting = repo
        .find_list(&mut uow, "findByUsernameStartingWith", args!["member"])
        .await
        .unwrap();
    assert_eq!(starting.len(), 5);
    let upper = repo
        .find_list(&mut uow, "findByUsernameStartingWith", args!["MEMBER"])
        .await
        .unwrap();
    assert!(upper.is_empty());

    let ignoring = repo
        .find_list(&mut uow, "findByUsernameIgnoreCase", args!["MEMBER3"])
        .await
        .unwrap();
    assert_eq!(ignoring.len(), 1);

    let by_names = repo
        .find_list(&mut uow, "findByNames", args![vec!["member1", "member2"]])
        .await
        .unwrap();
    assert_eq!(by_names.len(), 2);
    let none = repo
        .find_list(&mut uow, "findByNames", args![Vec::<String>::new()])
        .await
        .unwrap();
    assert!(none.is_empty());
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn paging_counts_and_slices_probe() {
    let backend = backend().await;
    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    for name in ["member1", "member2", "member3", "member4", "member5"] {
        uow.persist(&mut Member::new(name, 10)).await.unwrap();
    }
    uow.commit().await.unwrap();
    let repo = members();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    let pageable = Pageable::sorted(0, 3, Sort::by(Direction::Desc, &["username"]));
    let page = repo
        .find_page(&mut uow, "findByAge", args![10].with_pageable(pageable))
        .await
        .unwrap();
    let names: Vec<&str> = page.content.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(names, vec!["member5", "member4", "member3"]);
    assert_eq!(page.total_elements, 5);
    assert_eq!(page.total_pages, 2);
    assert!(page.has_next());

    let slice = repo
        .find_slice(&mut uow, "findByAgeOrderByUsernameDesc", args![10].with_pageable(Pageable::of(1, 3)))
        .await
        .unwrap();
    assert_eq!(slice.content.len(), 2);
    assert!(!slice.has_next);
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn bulk_update_and_derived_delete() {
    let backend = backend().await;
    seed(&backend).await;
    let repo = members();

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    let all = repo.find_all(&mut uow).await.unwrap();
    assert_eq!(all.len(), 5);
    let affected = repo.execute(&mut uow, "bulkAgePlus", args![20]).await.unwrap();
    assert_eq!(affected, 3);
    assert_eq!(uow.tracked(), 0);

    let member5 = repo
        .find_list(&mut uow, "findByNames", args![vec!["member5"]])
        .await
        .unwrap();
    assert_eq!(member5[0].age, 41);

    let removed = repo.execute(&mut uow, "deleteByAgeLessThan", args![20]).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(repo.count(&mut uow).await.unwrap(), 3);
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn fetch_joins_load_relations() {
    let backend = backend().await;
    seed(&backend).await;
    let mut uow = UnitOfWork::begin(&backend).await.unwrap();

    let fetched = members()
        .find_list(&mut uow, "findMemberFetchJoin", args![])
        .await
        .unwrap();
    assert_eq!(fetched.len(), 5);
    let with_team = fetched.iter().filter(|m| m.team.is_resolved()).count();
    assert_eq!(with_team, 4);
    let member1 = fetched.iter().find(|m| m.username == "member1").unwrap();
    assert_eq!(member1.team.get().unwrap().name, "teamA");

    let teams = teams()
        .find_list(&mut uow, "findAllWithMembers", args![])
        .await
        .unwrap();
    assert_eq!(teams.len(), 2);
    for team in &teams {
        assert_eq!(team.members.get().unwrap().len(), 2);
    }

    let dtos: Vec<MemberDto> = members()
        .project_list(&mut uow, "findMemberDto", args![])
        .await
        .unwrap();
    assert_eq!(dtos.len(), 4);
    assert!(dtos.iter().any(|d| d.username == "member3" && d.team_name == "teamB"));
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn file_database_is_shared_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("members.db").display());
    let backend = SqliteBackend::connect(&url, 4).await.unwrap();
    backend.create_schema(&catalog()).await.unwrap();
    seed(&backend).await;

    let mut uow = UnitOfWork::begin(&backend).await.unwrap();
    let mut team: Team = uow.find(Value::Int(1)).await.unwrap().unwrap();
    let loaded = uow.resolve_many(&mut team.members).await.unwrap();
    assert_eq!(loaded.len(), 2);
    uow.rollback().await.unwrap();
}
