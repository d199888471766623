use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userstore::{
    config::DatabaseConfig,
    db,
    models::{QueryFilter, User},
    queries::SortOrder,
    repositories::SqliteUserRepository,
    services::{CreateUserRequest, UpdatePasswordRequest, UserService},
};

#[derive(Parser)]
#[command(name = "userstore-cli")]
#[command(about = "CLI tool for managing stored users", long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User management commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Args)]
struct TimeRange {
    /// Only users created after this unix timestamp
    #[arg(long)]
    created_after: Option<i64>,

    /// Only users created before this unix timestamp
    #[arg(long)]
    created_before: Option<i64>,

    /// Only users updated after this unix timestamp
    #[arg(long)]
    updated_after: Option<i64>,

    /// Only users updated before this unix timestamp
    #[arg(long)]
    updated_before: Option<i64>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct UserSelector {
    /// User ID
    #[arg(long)]
    id: Option<i64>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Username
        #[arg(short, long)]
        username: String,

        /// Password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Show a single user, archived or not
    Get {
        #[command(flatten)]
        selector: UserSelector,
    },

    /// List active users
    List {
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Users per page
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Newest first
        #[arg(long)]
        desc: bool,

        #[command(flatten)]
        range: TimeRange,
    },

    /// Find active users whose username starts with a prefix
    Search {
        /// Username prefix
        prefix: String,
    },

    /// Count active users
    Count {
        #[command(flatten)]
        range: TimeRange,
    },

    /// Change a user's username
    Rename {
        /// User ID
        #[arg(long)]
        id: i64,

        /// New username
        #[arg(short, long)]
        username: String,
    },

    /// Set a new password for a user
    SetPassword {
        #[command(flatten)]
        selector: UserSelector,

        /// New password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Issue a new, unverified two-factor secret
    RotateTwoFactor {
        #[command(flatten)]
        selector: UserSelector,
    },

    /// Mark a user's pending two-factor secret as verified
    VerifyTwoFactor {
        #[command(flatten)]
        selector: UserSelector,
    },

    /// Archive (soft-delete) a user
    Archive {
        #[command(flatten)]
        selector: UserSelector,
    },
}

impl TimeRange {
    fn into_filter(self) -> QueryFilter {
        QueryFilter {
            created_after: self.created_after,
            created_before: self.created_before,
            updated_after: self.updated_after,
            updated_before: self.updated_before,
            ..Default::default()
        }
    }
}

fn get_password(prompt: &str) -> anyhow::Result<String> {
    use std::io::{self, Write};
    print!("{}: ", prompt);
    io::stdout().flush()?;

    Ok(rpassword::read_password()?)
}

fn password_with_confirmation(
    given: Option<String>,
    prompt: &str,
) -> anyhow::Result<(String, String)> {
    match given {
        Some(pw) => Ok((pw.clone(), pw)),
        None => {
            let password = get_password(prompt)?;
            let confirm = get_password("Confirm password")?;
            Ok((password, confirm))
        }
    }
}

fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn print_user(user: &User, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
        return Ok(());
    }

    println!("  ID: {}", user.id);
    println!("  Username: {}", user.username);
    println!("  Admin: {}", if user.is_admin { "Yes" } else { "No" });
    println!("  Created: {}", format_timestamp(Some(user.created_on)));
    println!("  Updated: {}", format_timestamp(user.updated_on));
    println!(
        "  Password changed: {}",
        format_timestamp(user.password_last_changed_on)
    );
    println!(
        "  Two-factor verified: {}",
        format_timestamp(user.two_factor_secret_verified_on)
    );
    if user.is_archived() {
        println!("  Archived: {}", format_timestamp(user.archived_on));
    }
    Ok(())
}

fn print_user_table(users: &[User]) {
    println!("{:<8} {:<32} {:<6} {:<20}", "ID", "Username", "Admin", "Created");
    println!("{}", "-".repeat(68));
    for user in users {
        println!(
            "{:<8} {:<32} {:<6} {:<20}",
            user.id,
            user.username,
            if user.is_admin { "Yes" } else { "No" },
            format_timestamp(Some(user.created_on))
        );
    }
}

async fn resolve_user(service: &UserService, selector: UserSelector) -> anyhow::Result<User> {
    let user = match (selector.id, selector.username) {
        (Some(id), _) => service.get_user(id).await,
        (None, Some(username)) => service.get_user_by_username(&username).await,
        (None, None) => bail!("either --id or --username is required"),
    };
    Ok(user?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "userstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Connect to database
    let config = DatabaseConfig::from_env()?;
    let pool = db::create_pool(&config)
        .await
        .context("connecting to database")?;

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let user_repository =
        Arc::new(SqliteUserRepository::new(pool).with_query_timeout(config.query_timeout));
    let user_service = UserService::new(user_repository);

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Create { username, password } => {
                let (password, password_confirm) =
                    password_with_confirmation(password, "Password")?;

                let request = CreateUserRequest {
                    username,
                    password,
                    password_confirm: Some(password_confirm),
                };

                let user = user_service
                    .create_user(request)
                    .await
                    .context("failed to create user")?;
                if !cli.json {
                    println!("✅ User created successfully!");
                }
                print_user(&user, cli.json)?;
            }

            UserCommands::Get { selector } => {
                let user = resolve_user(&user_service, selector).await?;
                print_user(&user, cli.json)?;
            }

            UserCommands::List {
                page,
                limit,
                desc,
                range,
            } => {
                let filter = QueryFilter {
                    page,
                    limit,
                    sort: if desc { SortOrder::Desc } else { SortOrder::Asc },
                    ..range.into_filter()
                };

                let list = user_service
                    .list_users(&filter)
                    .await
                    .context("failed to list users")?;

                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&list)?);
                } else if list.users.is_empty() {
                    println!("No users found.");
                } else {
                    print_user_table(&list.users);
                    println!(
                        "Page {} ({} per page), {} users total",
                        list.pagination.page, list.pagination.limit, list.pagination.total_count
                    );
                }
            }

            UserCommands::Search { prefix } => {
                let users = user_service
                    .search_users(&prefix)
                    .await
                    .context("failed to search users")?;

                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&users)?);
                } else if users.is_empty() {
                    println!("No users found.");
                } else {
                    print_user_table(&users);
                }
            }

            UserCommands::Count { range } => {
                let count = user_service
                    .count_users(&range.into_filter())
                    .await
                    .context("failed to count users")?;

                if cli.json {
                    println!("{}", serde_json::json!({ "count": count }));
                } else {
                    println!("{}", count);
                }
            }

            UserCommands::Rename { id, username } => {
                let user = user_service
                    .rename_user(id, &username)
                    .await
                    .context("failed to rename user")?;
                if !cli.json {
                    println!("✅ User renamed successfully!");
                }
                print_user(&user, cli.json)?;
            }

            UserCommands::SetPassword { selector, password } => {
                let user = resolve_user(&user_service, selector).await?;
                let (new_password, password_confirm) =
                    password_with_confirmation(password, "New password")?;

                let request = UpdatePasswordRequest {
                    user_id: user.id,
                    new_password,
                    new_password_confirm: Some(password_confirm),
                };

                user_service
                    .update_password(request)
                    .await
                    .context("failed to update password")?;
                println!("✅ Password updated successfully for '{}'!", user.username);
            }

            UserCommands::RotateTwoFactor { selector } => {
                let user = resolve_user(&user_service, selector).await?;
                let secret = user_service
                    .rotate_two_factor_secret(user.id)
                    .await
                    .context("failed to rotate two-factor secret")?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({ "id": user.id, "two_factor_secret": secret })
                    );
                } else {
                    println!("✅ New two-factor secret for '{}':", user.username);
                    println!("  {}", secret);
                    println!("⚠️  It must be verified before use");
                }
            }

            UserCommands::VerifyTwoFactor { selector } => {
                let user = resolve_user(&user_service, selector).await?;
                let user = user_service
                    .confirm_two_factor_secret(user.id)
                    .await
                    .context("failed to verify two-factor secret")?;
                if !cli.json {
                    println!("✅ Two-factor secret verified for '{}'!", user.username);
                }
                print_user(&user, cli.json)?;
            }

            UserCommands::Archive { selector } => {
                let user = resolve_user(&user_service, selector).await?;
                if user.is_archived() {
                    println!("ℹ️  User '{}' is already archived", user.username);
                } else {
                    user_service
                        .archive_user(user.id)
                        .await
                        .context("failed to archive user")?;
                    println!("✅ User '{}' archived successfully!", user.username);
                }
            }
        },
    }

    Ok(())
}
