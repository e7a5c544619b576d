use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::{Parser, Subcommand};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use puzzlecoop_core::codec::{decode, encode};
use puzzlecoop_core::{
    connected_pieces, ApiRequest, ApiResponse, ClientMsg, ParticipantId, ServerMsg, Session,
    SessionId,
};
use std::path::{Path, PathBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

mod solve;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8080";
const API_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "puzzlecoop-cli",
    version,
    about = "Create, inspect and play collaborative jigsaw sessions"
)]
struct Cli {
    #[arg(long, global = true, env = "PUZZLE_WS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Print every event of a session as it happens.
    Watch {
        session_id: String,
        /// Participant to connect as; omit to watch as an observer.
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        until_complete: bool,
    },
    /// Solve a session piece by piece as an existing participant.
    Solve(solve::SolveArgs),
}

#[derive(Subcommand)]
enum SessionCommand {
    Create {
        #[arg(long)]
        image: PathBuf,
        #[arg(long, default_value_t = 3)]
        grid: u32,
        /// Overrides the type guessed from the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },
    Show {
        session_id: String,
    },
    Join {
        session_id: String,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base_url = cli.base_url;

    match cli.command {
        Commands::Sessions { command } => match command {
            SessionCommand::Create {
                image,
                grid,
                content_type,
            } => {
                let content_type = match content_type {
                    Some(value) => value,
                    None => content_type_for(&image)
                        .ok_or("cannot tell the image type from its extension, pass --content-type")?
                        .to_string(),
                };
                let bytes = std::fs::read(&image)?;
                let request = ApiRequest::CreateSession {
                    image: URL_SAFE_NO_PAD.encode(bytes),
                    content_type,
                    grid_size: grid,
                };
                let ApiResponse::SessionCreated { session_id } =
                    api_call(&base_url, &request).await?
                else {
                    return Err("unexpected response to CREATE_SESSION".into());
                };
                println!("session_id: {session_id}");
                println!("game_url: {}", build_game_url(&base_url, &session_id, None)?);
            }
            SessionCommand::Show { session_id } => {
                let session_id = SessionId::parse(&session_id)?;
                let request = ApiRequest::GetSession {
                    session_id: session_id.to_string(),
                };
                let ApiResponse::Session { session } = api_call(&base_url, &request).await? else {
                    return Err("unexpected response to GET_SESSION".into());
                };
                print_session(&session);
            }
            SessionCommand::Join { session_id, name } => {
                let session_id = SessionId::parse(&session_id)?;
                let request = ApiRequest::JoinSession {
                    session_id: session_id.to_string(),
                    name,
                };
                let ApiResponse::Joined { user } = api_call(&base_url, &request).await? else {
                    return Err("unexpected response to JOIN_SESSION".into());
                };
                println!("user_id: {}", user.id);
                println!("name: {}", user.name);
                println!("color: {}", user.color);
                println!(
                    "game_url: {}",
                    build_game_url(&base_url, &session_id, Some(&user.id))?
                );
            }
        },
        Commands::Watch {
            session_id,
            user,
            until_complete,
        } => {
            let session_id = SessionId::parse(&session_id)?;
            let user = user.map(ParticipantId::new);
            let url = build_game_url(&base_url, &session_id, user.as_ref())?;
            let (ws, _response) = connect_async(url.as_str()).await?;
            let (_write, mut read) = ws.split();
            while let Some(text) = recv_server_text(&mut read).await {
                let Some(msg) = decode::<ServerMsg>(&text) else {
                    println!("unrecognised: {text}");
                    continue;
                };
                println!("{}: {text}", msg.kind());
                if until_complete && matches!(msg, ServerMsg::PuzzleComplete(_)) {
                    break;
                }
            }
        }
        Commands::Solve(args) => solve::run(&base_url, args).await?,
    }

    Ok(())
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

fn print_session(session: &Session) {
    let placed = session.pieces.iter().filter(|piece| piece.placed).count();
    let largest_group = session
        .pieces
        .iter()
        .map(|piece| connected_pieces(session, piece.id).len())
        .max()
        .unwrap_or(0);
    let grid = session.grid_size.get();
    println!("session_id: {}", session.id);
    println!("grid: {grid}x{grid}");
    println!("placed: {placed}/{}", session.total_pieces);
    println!("largest_group: {largest_group}");
    println!("completed: {}", session.completed);
    println!("image_url: {}", session.image_url);
    println!("users: {}", session.participants.len());
    for user in session.participants.values() {
        println!("  {} {} ({})", user.id, user.name, user.color);
    }
}

fn build_url(base_url: &str, suffix: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    let base_path = url.path().trim_end_matches('/');
    let path = format!("{base_path}{suffix}");
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

fn build_api_url(base_url: &str) -> Result<Url, url::ParseError> {
    build_url(base_url, "/api")
}

fn build_game_url(
    base_url: &str,
    session_id: &SessionId,
    user: Option<&ParticipantId>,
) -> Result<Url, url::ParseError> {
    let mut url = build_url(base_url, &format!("/ws/puzzle/{session_id}"))?;
    if let Some(user) = user {
        url.query_pairs_mut().append_pair("userId", user.as_str());
    }
    Ok(url)
}

async fn api_call(
    base_url: &str,
    request: &ApiRequest,
) -> Result<ApiResponse, Box<dyn std::error::Error>> {
    let url = build_api_url(base_url)?;
    let (ws, _response) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws.split();
    let payload = encode(request).ok_or("failed to encode request")?;
    write.send(Message::Text(payload.into())).await?;
    let text = timeout(API_TIMEOUT, recv_server_text(&mut read))
        .await?
        .ok_or("server closed the connection without answering")?;
    let _ = write.close().await;
    match decode::<ApiResponse>(&text) {
        Some(ApiResponse::Error { code, message }) => Err(format!("{code}: {message}").into()),
        Some(response) => Ok(response),
        None => Err(format!("unrecognised response: {text}").into()),
    }
}

async fn recv_server_text(read: &mut WsRead) -> Option<String> {
    while let Some(message) = read.next().await {
        let Ok(message) = message else {
            return None;
        };
        match message {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Binary(bytes) => {
                if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                    return Some(text);
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_client_msg(
    write: &mut WsWrite,
    msg: &ClientMsg,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(payload) = encode(msg) {
        write.send(Message::Text(payload.into())).await?;
    }
    Ok(())
}
