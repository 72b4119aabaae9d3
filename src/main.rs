use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use catalog_client::config::ConfigError;
use catalog_client::net::api::{self, ProductQuery};
use catalog_client::net::types::SupplierRequestStatus;
use catalog_client::routes::{self, Route};
use catalog_client::{
    ApiClient, ApiError, ClientConfig, FileTokenStore, MemoryTokenStore, Outcome, SessionManager, Shell, TokenStore,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("redirected to {0}")]
    Redirected(String),
    #[error("no route for {0}")]
    NoRoute(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Api(e) => e.error_code(),
            Self::Config(_) => "E_CONFIG",
            Self::Redirected(_) => "E_REDIRECT",
            Self::NoRoute(_) => "E_NO_ROUTE",
            Self::InvalidJson(_) => "E_INVALID_JSON",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "catalog", about = "Catalog API client")]
struct Cli {
    /// Overrides `CATALOG_API_BASE`.
    #[arg(long)]
    base_url: Option<String>,

    /// Overrides `CATALOG_TOKEN_DIR`.
    #[arg(long)]
    token_dir: Option<PathBuf>,

    /// Keep tokens in memory only.
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login(LoginArgs),
    Logout,
    Whoami,
    Register(RegisterArgs),
    VerifyEmail { uid: String, token: String },
    ResendVerification { email: String },
    Products(ProductsCommand),
    Forecast(ForecastCommand),
    Pricing(PricingCommand),
    SupplierRequest(SupplierRequestCommand),
    Admin(AdminCommand),
}

impl Command {
    /// Location whose gates guard this command.
    fn route(&self) -> String {
        match self {
            Self::Login(_) | Self::ResendVerification { .. } => "/login".into(),
            Self::Logout => "/logout".into(),
            Self::Whoami => "/".into(),
            Self::Register(_) => "/signup".into(),
            Self::VerifyEmail { uid, token } => format!("/verify-email/{uid}/{token}"),
            Self::Products(_) | Self::Forecast(_) => "/products".into(),
            Self::Pricing(_) => "/pricing".into(),
            Self::SupplierRequest(_) => "/supplier-request".into(),
            Self::Admin(_) => "/admin/supplier-requests".into(),
        }
    }
}

#[derive(Args, Debug)]
struct LoginArgs {
    username: String,
    #[arg(long, env = "CATALOG_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    username: String,
    email: String,
    #[arg(long, env = "CATALOG_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct ProductsCommand {
    #[command(subcommand)]
    command: ProductsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProductsSubcommand {
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ordering: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    Mine,
    Get {
        id: i64,
    },
    Create {
        #[arg(long)]
        data: String,
    },
    Update {
        id: i64,
        #[arg(long)]
        data: String,
    },
    Delete {
        id: i64,
    },
    History {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct ForecastCommand {
    #[command(subcommand)]
    command: ForecastSubcommand,
}

#[derive(Subcommand, Debug)]
enum ForecastSubcommand {
    Overview,
    Chart {
        #[arg(long, value_delimiter = ',')]
        product_ids: Vec<i64>,
    },
    Generate {
        #[arg(long, value_delimiter = ',')]
        product_ids: Vec<i64>,
        #[arg(long)]
        years: Option<u32>,
    },
    List {
        #[arg(long)]
        page: Option<u32>,
    },
    Get {
        id: i64,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct PricingCommand {
    #[command(subcommand)]
    command: PricingSubcommand,
}

#[derive(Subcommand, Debug)]
enum PricingSubcommand {
    Optimize,
    Market,
    Apply {
        #[arg(required = true, value_delimiter = ',')]
        product_ids: Vec<i64>,
    },
}

#[derive(Args, Debug)]
struct SupplierRequestCommand {
    #[command(subcommand)]
    command: SupplierRequestSubcommand,
}

#[derive(Subcommand, Debug)]
enum SupplierRequestSubcommand {
    Status,
    Submit {
        #[arg(long)]
        company: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Args, Debug)]
struct AdminCommand {
    #[command(subcommand)]
    command: AdminSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminSubcommand {
    Requests(AdminRequestsCommand),
}

#[derive(Args, Debug)]
struct AdminRequestsCommand {
    #[command(subcommand)]
    command: AdminRequestsSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminRequestsSubcommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    Approve {
        id: i64,
    },
    Reject {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Redirected(location)) => {
            eprintln!("redirect: {location}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error [{}]: {e}", e.error_code());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ClientConfig::from_env()?.with_overrides(cli.base_url.as_deref(), cli.token_dir)?;
    let store: Arc<dyn TokenStore> = if cli.ephemeral {
        Arc::new(MemoryTokenStore::new())
    } else {
        Arc::new(FileTokenStore::open(&config.token_dir, config.origin()))
    };
    let client = Arc::new(ApiClient::new(&config, store)?);
    let session = Arc::new(SessionManager::new(client));
    let shell = Shell::new(session.clone());
    tracing::debug!(api_base = %config.api_base, "client configured");

    let location = cli.command.route();
    let public = routes::resolve(&location).is_some_and(Route::is_public);
    if !public || matches!(cli.command, Command::Whoami) {
        session.bootstrap().await;
    }

    match shell.navigate(&location) {
        Outcome::Render(_) => {}
        Outcome::Redirected(redirect) => return Err(CliError::Redirected(redirect.href())),
        Outcome::Loading | Outcome::NotFound => return Err(CliError::NoRoute(location)),
    }

    let result = execute(&session, cli.command).await;
    let session_lost = shell.pump().await > 0;
    match result {
        Err(CliError::Api(ApiError::SessionInvalid)) if session_lost => Err(CliError::Redirected(shell.location())),
        other => other,
    }
}

async fn execute(session: &SessionManager, command: Command) -> Result<(), CliError> {
    let client = session.client().as_ref();
    match command {
        Command::Login(args) => print(&session.login(&args.username, &args.password).await?),
        Command::Logout => {
            session.logout().await;
            println!("logged out");
            Ok(())
        }
        Command::Whoami => match session.snapshot().identity {
            Some(user) => print(&user),
            None => {
                println!("anonymous");
                Ok(())
            }
        },
        Command::Register(args) => {
            println!("{}", session.register(&args.username, &args.email, &args.password).await?);
            Ok(())
        }
        Command::VerifyEmail { uid, token } => {
            println!("{}", session.verify_email(&uid, &token).await?);
            Ok(())
        }
        Command::ResendVerification { email } => {
            println!("{}", session.resend_verification(&email).await?);
            Ok(())
        }
        Command::Products(products) => run_products(client, products.command).await,
        Command::Forecast(forecast) => run_forecast(client, forecast.command).await,
        Command::Pricing(pricing) => run_pricing(client, pricing.command).await,
        Command::SupplierRequest(request) => run_supplier_request(client, request.command).await,
        Command::Admin(admin) => match admin.command {
            AdminSubcommand::Requests(requests) => run_admin_requests(client, requests.command).await,
        },
    }
}

async fn run_products(client: &ApiClient, command: ProductsSubcommand) -> Result<(), CliError> {
    match command {
        ProductsSubcommand::List { search, category, ordering, page, page_size } => {
            let query = ProductQuery { search, category, ordering, page, page_size };
            print(&api::list_products(client, &query).await?)
        }
        ProductsSubcommand::Mine => print(&api::list_my_products(client).await?),
        ProductsSubcommand::Get { id } => print(&api::get_product(client, id).await?),
        ProductsSubcommand::Create { data } => {
            let fields = parse_json(&data)?;
            print(&api::create_product(client, &fields).await?)
        }
        ProductsSubcommand::Update { id, data } => {
            let fields = parse_json(&data)?;
            print(&api::update_product(client, id, &fields).await?)
        }
        ProductsSubcommand::Delete { id } => {
            api::delete_product(client, id).await?;
            println!("deleted product {id}");
            Ok(())
        }
        ProductsSubcommand::History { id } => print(&api::price_history(client, id).await?),
    }
}

async fn run_forecast(client: &ApiClient, command: ForecastSubcommand) -> Result<(), CliError> {
    match command {
        ForecastSubcommand::Overview => print(&api::forecast_overview(client).await?),
        ForecastSubcommand::Chart { product_ids } => print(&api::forecast_chart_data(client, &product_ids).await?),
        ForecastSubcommand::Generate { product_ids, years } => {
            print(&api::generate_forecasts(client, &product_ids, years).await?)
        }
        ForecastSubcommand::List { page } => print(&api::list_forecasts(client, page).await?),
        ForecastSubcommand::Get { id } => print(&api::get_forecast(client, id).await?),
        ForecastSubcommand::Delete { id } => {
            api::delete_forecast(client, id).await?;
            println!("deleted forecast {id}");
            Ok(())
        }
    }
}

async fn run_pricing(client: &ApiClient, command: PricingSubcommand) -> Result<(), CliError> {
    match command {
        PricingSubcommand::Optimize => print(&api::optimize_all(client).await?),
        PricingSubcommand::Market => print(&api::market_analysis(client).await?),
        PricingSubcommand::Apply { product_ids } => print(&api::apply_optimization(client, &product_ids).await?),
    }
}

async fn run_supplier_request(client: &ApiClient, command: SupplierRequestSubcommand) -> Result<(), CliError> {
    match command {
        SupplierRequestSubcommand::Status => print(&api::my_supplier_request(client).await?),
        SupplierRequestSubcommand::Submit { company, reason } => {
            print(&api::submit_supplier_request(client, &company, &reason).await?)
        }
    }
}

async fn run_admin_requests(client: &ApiClient, command: AdminRequestsSubcommand) -> Result<(), CliError> {
    match command {
        AdminRequestsSubcommand::List { page, page_size } => {
            print(&api::list_supplier_requests(client, page, page_size).await?)
        }
        AdminRequestsSubcommand::Approve { id } => {
            print(&api::decide_supplier_request(client, id, SupplierRequestStatus::Approved).await?)
        }
        AdminRequestsSubcommand::Reject { id } => {
            print(&api::decide_supplier_request(client, id, SupplierRequestStatus::Rejected).await?)
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(value)
}

fn print<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
