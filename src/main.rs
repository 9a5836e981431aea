use workdesk::application_port::*;
use workdesk::client::*;
use workdesk::domain_model::*;
use workdesk::logger::*;
use workdesk::settings::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let client = Client::try_new(&project_settings)?;
    client
        .invalidation_hub
        .set_handler(|| warn!("session expired, sign in again"));

    let result = run(&client, cli.command).await;
    client.shutdown();
    result
}

async fn run(client: &Client, command: Option<Command>) -> anyhow::Result<()> {
    let Some(command) = command else {
        let signed_in = client.auth_service.is_authenticated().await?;
        println!("signed in: {signed_in}");
        return Ok(());
    };

    match command {
        Command::Login { email, password } => {
            client
                .auth_service
                .login(LoginInput { email, password })
                .await?;
            println!("signed in");
        }
        Command::MagicLink { email } => {
            client.auth_service.request_magic_link(&email).await?;
            println!("sign-in link sent to {email}");
        }
        Command::Verify { token } => {
            client.auth_service.verify_magic_link(&token).await?;
            println!("signed in");
        }
        Command::Get { path } => {
            let body: serde_json::Value = get_json(client.api.as_ref(), &path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Tasks { project } => {
            let tasks = client
                .task_board_service
                .list_tasks(&ProjectId(project))
                .await?;
            for task in tasks {
                println!("{:<8} {:<12} {}", task.id, task.status, task.title);
            }
        }
        Command::MoveTask {
            project,
            task,
            status,
        } => {
            let status: TaskStatus = status.parse().map_err(anyhow::Error::msg)?;
            let task = client
                .task_board_service
                .move_task(&ProjectId(project), &TaskId(task), status)
                .await?;
            println!("{} is now {}", task.id, task.status);
        }
        Command::Logout => {
            client.auth_service.logout().await?;
            println!("signed out");
        }
    }

    Ok(())
}
