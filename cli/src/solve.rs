use super::*;

use puzzlecoop_core::{PiecePosition, PieceRef, RotateDirection, RotateRequest, Rotation};
use tokio::time::{sleep, Instant};

const STATE_TIMEOUT: Duration = Duration::from_secs(5);
const PIECE_TIMEOUT: Duration = Duration::from_secs(3);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(clap::Args)]
pub(super) struct SolveArgs {
    session_id: String,
    /// Participant to play as. It must already have joined the session.
    #[arg(long)]
    user: String,
    /// Pause between pieces, so watchers can follow along.
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,
    #[arg(long, default_value_t = 5)]
    max_passes: u32,
}

pub(super) async fn run(base_url: &str, args: SolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let session_id = SessionId::parse(&args.session_id)?;
    let me = ParticipantId::new(args.user);
    let url = build_game_url(base_url, &session_id, Some(&me))?;
    let (ws, _response) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws.split();

    let mut state = SolverState::new(me);
    while state.session.is_none() {
        let msg = recv_server_msg_timeout(&mut read, STATE_TIMEOUT)
            .await
            .ok_or("no session state received; has this user joined the session?")?;
        state.apply_server_msg(&msg);
    }
    if state.joined() {
        println!("solving as {}", state.me);
    } else {
        return Err(format!("{} is not a participant of {session_id}", state.me).into());
    }

    for pass in 1..=args.max_passes {
        if state.completed {
            break;
        }
        if pass > 1 {
            let request = ApiRequest::GetSession {
                session_id: session_id.to_string(),
            };
            if let ApiResponse::Session { session } = api_call(base_url, &request).await? {
                state.completed |= session.completed;
                state.session = Some(*session);
            }
        }
        let targets = state.targets();
        println!("pass {pass}: {} pieces to place", targets.len());
        for target in targets {
            if state.completed {
                break;
            }
            let placed = solve_piece(&mut write, &mut read, &mut state, target).await?;
            if !placed {
                println!("piece {} was taken by someone else, retrying later", target.piece_id);
            }
            if args.delay_ms > 0 {
                sleep(Duration::from_millis(args.delay_ms)).await;
            }
        }
        pump_until_complete(&mut read, &mut state, SETTLE_TIMEOUT).await;
    }

    let _ = write.close().await;
    if state.completed {
        println!("puzzle complete");
        Ok(())
    } else {
        Err(format!("puzzle not complete after {} passes", args.max_passes).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Target {
    piece_id: u32,
    x: f64,
    y: f64,
    clockwise_turns: u16,
}

/// Quarter turns clockwise that bring `current` to `wanted`.
fn clockwise_turns(current: Rotation, wanted: Rotation) -> u16 {
    ((wanted.degrees() + 360 - current.degrees()) % 360) / 90
}

/// Local mirror of the session, kept current from broadcasts.
#[derive(Debug)]
struct SolverState {
    me: ParticipantId,
    session: Option<Session>,
    completed: bool,
}

impl SolverState {
    fn new(me: ParticipantId) -> Self {
        Self {
            me,
            session: None,
            completed: false,
        }
    }

    fn joined(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.participants.contains_key(&self.me))
    }

    fn apply_server_msg(&mut self, msg: &ServerMsg) {
        match msg {
            ServerMsg::SessionState(state) => {
                self.completed |= state.session.completed;
                self.session = Some(state.session.clone());
                return;
            }
            ServerMsg::PuzzleComplete(_) => {
                self.completed = true;
                return;
            }
            _ => {}
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match msg {
            ServerMsg::UserJoin(joined) => {
                session
                    .participants
                    .insert(joined.user.id.clone(), joined.user.clone());
            }
            ServerMsg::UserLeave(left) => {
                session.participants.remove(&left.user_id);
            }
            ServerMsg::PieceLock(PieceRef { piece_id, user_id }) => {
                if let Some(piece) = session.pieces.get_mut(*piece_id as usize) {
                    piece.locked_by = user_id.clone();
                }
            }
            ServerMsg::PieceUnlock(PieceRef { piece_id, .. }) => {
                if let Some(piece) = session.pieces.get_mut(*piece_id as usize) {
                    piece.locked_by = None;
                }
            }
            ServerMsg::PieceMove(pos) => {
                if let Some(piece) = session.pieces.get_mut(pos.piece_id as usize) {
                    piece.current_x = pos.x;
                    piece.current_y = pos.y;
                }
            }
            ServerMsg::PiecePlaced(PieceRef { piece_id, user_id }) => {
                if let Some(piece) = session.pieces.get_mut(*piece_id as usize) {
                    piece.placed = true;
                    piece.placed_by = user_id.clone();
                }
            }
            ServerMsg::PieceRotate(rotated) => {
                if let Some(piece) = session.pieces.get_mut(rotated.piece_id as usize) {
                    piece.rotation = rotated.rotation;
                }
            }
            _ => {}
        }
    }

    /// Unplaced pieces nobody else is holding, in id order.
    fn targets(&self) -> Vec<Target> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        session
            .pieces
            .iter()
            .filter(|piece| !piece.placed)
            .filter(|piece| {
                piece
                    .locked_by
                    .as_ref()
                    .map_or(true, |owner| owner == &self.me)
            })
            .map(|piece| Target {
                piece_id: piece.id,
                x: piece.correct_x,
                y: piece.correct_y,
                clockwise_turns: clockwise_turns(piece.rotation, piece.correct_rotation),
            })
            .collect()
    }
}

/// Lock, turn upright, drop on target, unlock. Returns whether the drop went through.
async fn solve_piece(
    write: &mut WsWrite,
    read: &mut WsRead,
    state: &mut SolverState,
    target: Target,
) -> Result<bool, Box<dyn std::error::Error>> {
    let piece_ref = PieceRef {
        piece_id: target.piece_id,
        user_id: None,
    };
    send_client_msg(write, &ClientMsg::PieceLock(piece_ref.clone())).await?;
    for _ in 0..target.clockwise_turns {
        let rotate = ClientMsg::PieceRotate(RotateRequest {
            piece_id: target.piece_id,
            direction: RotateDirection::Clockwise,
            user_id: None,
        });
        send_client_msg(write, &rotate).await?;
    }
    let release = ClientMsg::PieceRelease(PiecePosition {
        piece_id: target.piece_id,
        x: target.x,
        y: target.y,
        user_id: None,
    });
    send_client_msg(write, &release).await?;

    let deadline = Instant::now() + PIECE_TIMEOUT;
    let mut dropped = false;
    while !dropped {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(msg) = recv_server_msg_timeout(read, remaining).await else {
            break;
        };
        state.apply_server_msg(&msg);
        if let ServerMsg::PieceMove(pos) = &msg {
            dropped = pos.piece_id == target.piece_id && pos.user_id.as_ref() == Some(&state.me);
        }
    }

    send_client_msg(write, &ClientMsg::PieceUnlock(piece_ref)).await?;
    if let Some(piece) = state
        .session
        .as_mut()
        .and_then(|session| session.pieces.get_mut(target.piece_id as usize))
    {
        piece.locked_by = None;
    }
    Ok(dropped)
}

async fn pump_until_complete(read: &mut WsRead, state: &mut SolverState, window: Duration) {
    let deadline = Instant::now() + window;
    while !state.completed {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(msg) = recv_server_msg_timeout(read, remaining).await else {
            break;
        };
        state.apply_server_msg(&msg);
    }
}

async fn recv_server_msg_timeout(read: &mut WsRead, dur: Duration) -> Option<ServerMsg> {
    let next = async {
        while let Some(text) = recv_server_text(read).await {
            if let Some(msg) = decode::<ServerMsg>(&text) {
                return Some(msg);
            }
        }
        None
    };
    timeout(dur, next).await.ok().flatten()
}
