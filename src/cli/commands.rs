use crate::api::{get_homeserver_for_matrix_id, MatrixClient, DEFAULT_MSGTYPE};
use crate::cli::docker;
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::models::{Credentials, MatrixId};
use crate::store::UserDataStore;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use comfy_table::Table;
use dialoguer::{theme::ColorfulTheme, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{error, info};

/// Convenience CLI for Matrix homeservers
#[derive(Parser, Debug)]
#[command(name = "fractal", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in to or out of a homeserver
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Register users and manage registration tokens (requires login)
    #[command(subcommand)]
    Registration(RegistrationCommands),

    /// Work with rooms as the logged-in user
    #[command(subcommand)]
    Room(RoomCommands),

    /// Look up the homeserver for a Matrix ID
    Discover {
        /// Matrix ID such as @alice:example.org
        matrix_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Login to a Matrix homeserver
    Login {
        /// Matrix ID of user to login as
        matrix_id: String,

        /// Homeserver to login to (discovered from the Matrix ID if omitted)
        #[arg(long)]
        homeserver_url: Option<String>,

        /// Password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Logout of Matrix
    Logout,

    /// Print one of the saved login values
    Show {
        #[arg(value_enum)]
        key: ShowKey,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShowKey {
    AccessToken,
    HomeserverUrl,
    MatrixId,
}

#[derive(Subcommand, Debug)]
pub enum RegistrationCommands {
    /// Register a user and print their access token
    Register(RegisterArgs),

    /// Manage registration tokens
    Token {
        #[arg(value_enum)]
        action: TokenAction,
    },
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Matrix ID of user to register
    pub matrix_id: String,

    /// Password to register with
    pub password: String,

    /// Registration token to use
    pub registration_token: String,

    /// Homeserver to register with
    #[arg(long)]
    pub homeserver_url: Option<String>,

    /// Register inside the local Synapse container instead
    #[arg(long)]
    pub local: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenAction {
    Create,
    List,
}

#[derive(Subcommand, Debug)]
pub enum RoomCommands {
    /// List pending room invites
    Invites,

    /// Join a room by id or alias
    Join { room: String },

    /// Invite a user to a room as admin (power level 100)
    Invite { user_id: String, room: String },

    /// Send a message to a room
    Send {
        room: String,
        message: String,
        /// Event type to send
        #[arg(long, default_value = DEFAULT_MSGTYPE)]
        msgtype: String,
    },

    /// Print the latest sync token for a room
    SyncToken { room: String },

    /// Upload a file and print its mxc:// URI
    Upload {
        file: PathBuf,
        #[arg(long)]
        filename: Option<String>,
    },
}

/// Prompts for a Matrix password without echoing it.
pub fn prompt_matrix_password(matrix_id: &str) -> Result<String> {
    println!("Login with Matrix ID ({}) to continue", matrix_id);
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("{}'s password", matrix_id))
        .interact()?;
    Ok(password)
}

/// CLI application
pub struct App {
    settings: Settings,
    store: UserDataStore,
}

impl App {
    /// Create a new CLI application from the environment
    pub fn new() -> Result<Self> {
        let settings = Settings::from_env();
        let store = UserDataStore::default_location()?;
        Ok(Self::with_store(settings, store))
    }

    pub fn with_store(settings: Settings, store: UserDataStore) -> Self {
        Self { settings, store }
    }

    /// Run the CLI application
    pub async fn run(&self, cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Auth(AuthCommands::Login {
                matrix_id,
                homeserver_url,
                password,
            }) => self.login(&matrix_id, homeserver_url, password).await,
            Commands::Auth(AuthCommands::Logout) => self.logout().await,
            Commands::Auth(AuthCommands::Show { key }) => {
                println!("{}", self.show(key)?);
                Ok(())
            },
            Commands::Registration(RegistrationCommands::Register(args)) => {
                let (access_token, _) = self.register(args).await?;
                println!("{}", access_token);
                Ok(())
            },
            Commands::Registration(RegistrationCommands::Token { action }) => {
                self.token(action).await
            },
            Commands::Room(command) => self.room(command).await,
            Commands::Discover { matrix_id } => self.discover(&matrix_id).await,
        }
    }

    async fn login(
        &self,
        matrix_id: &str,
        homeserver_url: Option<String>,
        password: Option<String>,
    ) -> Result<()> {
        let (homeserver_url, access_token) = self
            .login_with_password(matrix_id, password, homeserver_url)
            .await?;

        self.store.save_credentials(&Credentials {
            access_token,
            homeserver_url,
            matrix_id: matrix_id.to_string(),
        })?;

        println!("{}", format!("Successfully logged in as {}", matrix_id).green());
        Ok(())
    }

    async fn login_with_password(
        &self,
        matrix_id: &str,
        password: Option<String>,
        homeserver_url: Option<String>,
    ) -> Result<(String, String)> {
        let homeserver_url = match homeserver_url {
            Some(url) => url,
            None => get_homeserver_for_matrix_id(matrix_id, &self.settings).await?.0,
        };
        let password = match password {
            Some(password) => password,
            None => prompt_matrix_password(matrix_id)?,
        };

        let session = MatrixClient::builder(&self.settings)
            .homeserver_url(homeserver_url.clone())
            .build()?;
        let user = matrix_id.to_string();
        let login = session
            .run(move |client| {
                Box::pin(async move {
                    client.set_user(user);
                    client.login(&password).await
                })
            })
            .await?;
        Ok((homeserver_url, login.access_token))
    }

    async fn logout(&self) -> Result<()> {
        let credentials = match self.store.load_credentials() {
            Ok(credentials) => credentials,
            Err(AppError::NotLoggedIn) => {
                println!("You are not logged in.");
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        self.store.clear_credentials()?;
        self.authenticated_session(&credentials)?
            .run(|client| Box::pin(async move { client.logout().await }))
            .await?;
        println!("{}", "Successfully logged out. Have a nice day.".green());
        Ok(())
    }

    fn show(&self, key: ShowKey) -> Result<String> {
        let credentials = self.store.load_credentials()?;
        Ok(match key {
            ShowKey::AccessToken => credentials.access_token,
            ShowKey::HomeserverUrl => credentials.homeserver_url,
            ShowKey::MatrixId => credentials.matrix_id,
        })
    }

    fn authenticated_session(&self, credentials: &Credentials) -> Result<MatrixClient> {
        MatrixClient::builder(&self.settings)
            .homeserver_url(credentials.homeserver_url.clone())
            .access_token(credentials.access_token.clone())
            .build()
    }

    /// Registers a user, returning `(access_token, homeserver_url)`.
    async fn register(&self, args: RegisterArgs) -> Result<(String, String)> {
        let credentials = self.store.load_credentials()?;
        if args.local {
            return self.register_local(&args.matrix_id, &args.password).await;
        }
        let homeserver_url = match args.homeserver_url {
            Some(url) => url,
            None => get_homeserver_for_matrix_id(&args.matrix_id, &self.settings).await?.0,
        };

        let session = MatrixClient::builder(&self.settings)
            .homeserver_url(homeserver_url.clone())
            .access_token(credentials.access_token)
            .build()?;
        let RegisterArgs {
            matrix_id,
            password,
            registration_token,
            ..
        } = args;
        let access_token = session
            .run(move |client| {
                Box::pin(async move {
                    client
                        .register_with_token(&matrix_id, &password, &registration_token, "", true)
                        .await
                })
            })
            .await?;
        Ok((access_token, homeserver_url))
    }

    async fn register_local(&self, matrix_id: &str, password: &str) -> Result<(String, String)> {
        let container = docker::find_homeserver_container(&self.settings.synapse_docker_label)
            .await
            .map_err(|e| {
                error!("No synapse server running locally: {}", e);
                e
            })?;
        let username = MatrixId::parse(matrix_id)?.localpart().to_string();
        let homeserver_url = get_homeserver_for_matrix_id(matrix_id, &self.settings).await?.0;

        docker::register_admin_user(&container, &username, password).await?;

        let session = MatrixClient::builder(&self.settings)
            .homeserver_url(homeserver_url.clone())
            .build()?;
        let password = password.to_string();
        let access_token = session
            .run(move |client| {
                Box::pin(async move {
                    client.set_user(username);
                    let login = client.login(&password).await?;
                    client.disable_ratelimiting(&login.user_id).await?;
                    Ok(login.access_token)
                })
            })
            .await?;
        Ok((access_token, homeserver_url))
    }

    async fn token(&self, action: TokenAction) -> Result<()> {
        match action {
            TokenAction::Create => {
                let credentials = self.store.load_credentials()?;
                let token = self
                    .authenticated_session(&credentials)?
                    .run(|client| {
                        Box::pin(async move { client.generate_registration_token().await })
                    })
                    .await?;
                println!("{}", token);
                Ok(())
            },
            TokenAction::List => Err(AppError::Unsupported(
                "listing registration tokens is not implemented yet".to_string(),
            )),
        }
    }

    async fn room(&self, command: RoomCommands) -> Result<()> {
        let credentials = self.store.load_credentials()?;
        let session = self.authenticated_session(&credentials)?;

        match command {
            RoomCommands::Invites => {
                let invites = session
                    .run(|client| Box::pin(async move { client.get_room_invites().await }))
                    .await?;
                if invites.is_empty() {
                    println!("No pending invites.");
                    return Ok(());
                }
                let mut table = Table::new();
                table.set_header(vec!["Room", "Name", "Invited by"]);
                let mut rooms: Vec<_> = invites.into_iter().collect();
                rooms.sort_by(|a, b| a.0.cmp(&b.0));
                for (room_id, invite) in &rooms {
                    table.add_row(vec![
                        room_id.as_str(),
                        invite.room_name().unwrap_or(""),
                        invite.inviter().unwrap_or(""),
                    ]);
                }
                println!("{table}");
            },
            RoomCommands::Join { room } => {
                let joined = session
                    .run(move |client| Box::pin(async move { client.join_room(&room).await }))
                    .await?;
                println!("Joined {}", joined.green());
            },
            RoomCommands::Invite { user_id, room } => {
                let invited = user_id.clone();
                session
                    .run(move |client| {
                        Box::pin(async move { client.invite(&user_id, &room, true).await })
                    })
                    .await?;
                println!("Invited {}", invited.green());
            },
            RoomCommands::Send {
                room,
                message,
                msgtype,
            } => {
                let sent = session
                    .run(move |client| {
                        Box::pin(async move {
                            Ok(client.send_message(&room, message, &msgtype).await)
                        })
                    })
                    .await?;
                match sent {
                    Some(event_id) => println!("Sent {}", event_id),
                    None => println!("{}", "Message was not sent. Check logs.".red()),
                }
            },
            RoomCommands::SyncToken { room } => {
                let token = session
                    .run(move |client| {
                        Box::pin(async move { client.get_latest_sync_token(Some(&room)).await })
                    })
                    .await?;
                println!("{}", token);
            },
            RoomCommands::Upload { file, filename } => {
                let bar = ProgressBar::new(0);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                    )?
                    .progress_chars("#>-"),
                );
                let progress = bar.clone();
                let uri = session
                    .run(move |client| {
                        Box::pin(async move {
                            client
                                .upload_file(&file, Some(&progress), filename.as_deref())
                                .await
                        })
                    })
                    .await;
                bar.finish_and_clear();
                println!("{}", uri?);
            },
        }
        Ok(())
    }

    async fn discover(&self, matrix_id: &str) -> Result<()> {
        let (homeserver_url, apex_changed) =
            get_homeserver_for_matrix_id(matrix_id, &self.settings).await?;
        info!("Homeserver for {} is {}", matrix_id, homeserver_url);
        println!("{}", homeserver_url);
        if apex_changed {
            println!(
                "{}",
                "Note: the homeserver is delegated to a different host.".yellow()
            );
        }
        Ok(())
    }
}
