use clap::Parser;
use datarepo::data::{CrudRepository, UnitOfWork};
use datarepo::{DataConfig, DataSettings};
use member_repository::{catalog, open_backend, username_desc, Member, MemberRepository, Team, TeamRepository};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "member-repository", about = "Run the member repository walkthrough")]
struct Cli {
    /// Configuration profile (overridden by DATAREPO_PROFILE)
    #[arg(long, default_value = "dev")]
    profile: String,
    /// Directory holding application.yaml and the .env files
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    datarepo::init_tracing();
    let cli = Cli::parse();

    let config = DataConfig::load_from(&cli.config_dir, &cli.profile)?.with_typed::<DataSettings>()?;
    info!(profile = config.profile(), backend = %config.backend, "Configuration ready");

    let catalog = catalog()?;
    let members = MemberRepository::new(&catalog, &config)?;
    let teams = TeamRepository::new(&catalog, &config)?;
    let backend = open_backend(&config, &catalog).await?;

    let mut uow = UnitOfWork::begin(&*backend).await?;
    let team_a = teams.save(&mut uow, Team::new("teamA")).await?;
    let team_b = teams.save(&mut uow, Team::new("teamB")).await?;
    for (name, age, team) in [
        ("member1", 10, &team_a),
        ("member2", 19, &team_a),
        ("member3", 20, &team_b),
        ("member4", 21, &team_b),
        ("member5", 40, &team_b),
    ] {
        members.save(&mut uow, Member::new(name, age).with_team(team)).await?;
    }
    uow.commit().await?;

    let mut uow = UnitOfWork::begin(&*backend).await?;
    let older = members.find_by_username_and_age_greater_than(&mut uow, "member4", 15).await?;
    info!(found = older.len(), "findByUsernameAndAgeGreaterThan(member4, 15)");

    let page = members.find_by_age(&mut uow, 10, username_desc(0, config.default_page_size)).await?;
    info!(
        total_elements = page.total_elements,
        total_pages = page.total_pages,
        "findByAge(10) first page"
    );

    for dto in members.find_member_dto(&mut uow).await? {
        info!(id = dto.id, username = %dto.username, team = %dto.team_name, "MemberDto");
    }

    let affected = members.bulk_age_plus(&mut uow, 20).await?;
    info!(affected, "bulkAgePlus(20)");

    for member in members.find_all(&mut uow).await? {
        let team = member.team.get().map(|t| t.name.as_str()).unwrap_or("-");
        info!(username = %member.username, age = member.age, team, "Member with team");
    }
    uow.commit().await?;
    Ok(())
}
