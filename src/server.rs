use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use warp::http::{HeaderValue, StatusCode, Uri};
use warp::reply::Response;
use warp::ws::{WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::context::{Caller, RequestContext};
use crate::error::ChatError;
use crate::messages::{
    CreateChatRequest, CreatedChat, LoginRequest, MessagesQuery, SendMessageRequest,
    SignupRequest,
};
use crate::realtime::Hub;
use crate::service::{Admitted, ChatService};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct Server {
    service: Arc<ChatService>,
    hub: Arc<Hub>,
}

#[derive(Debug, Deserialize, Default)]
struct WsQuery {
    /// `<api_key>:<api_secret>`, for clients that cannot set headers on an upgrade.
    token: Option<String>,
}

impl Server {
    pub fn new(service: Arc<ChatService>, hub: Arc<Hub>) -> Self {
        Self { service, hub }
    }

    pub fn routes(
        &self,
        allowed_origins: &[String],
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let service = self.service.clone();
        let with_service = warp::any().map(move || service.clone());
        let ctx = with_context(self.service.clone());

        let get_chats = warp::path!("api" / "chats")
            .and(warp::get())
            .and(with_service.clone())
            .and(ctx.clone())
            .then(get_chats);

        let create_chat = warp::path!("api" / "chats")
            .and(warp::post())
            .and(with_service.clone())
            .and(ctx.clone())
            .and(json_body::<CreateChatRequest>())
            .then(create_chat);

        let get_messages = warp::path!("api" / "chats" / String / "messages")
            .and(warp::get())
            .and(with_service.clone())
            .and(ctx.clone())
            .and(warp::query::<MessagesQuery>())
            .then(get_messages);

        let send_message = warp::path!("api" / "chats" / String / "messages")
            .and(warp::post())
            .and(with_service.clone())
            .and(ctx.clone())
            .and(json_body::<SendMessageRequest>())
            .then(send_message);

        let mark_as_read = warp::path!("api" / "chats" / String / "read")
            .and(warp::post())
            .and(with_service.clone())
            .and(ctx.clone())
            .then(mark_as_read);

        let participants = warp::path!("api" / "chats" / String / "participants")
            .and(warp::get())
            .and(with_service.clone())
            .and(ctx.clone())
            .then(get_chat_participants);

        let users = warp::path!("api" / "users")
            .and(warp::get())
            .and(with_service.clone())
            .and(ctx.clone())
            .then(get_users);

        let login = warp::path!("api" / "login")
            .and(warp::post())
            .and(with_service.clone())
            .and(ctx.clone())
            .and(json_body::<LoginRequest>())
            .then(login);

        let signup = warp::path!("api" / "signup")
            .and(warp::post())
            .and(with_service.clone())
            .and(ctx.clone())
            .and(json_body::<SignupRequest>())
            .then(signup);

        let hub = self.hub.clone();
        let ws_route = warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .and(with_service)
            .and(ctx)
            .and(warp::query::<WsQuery>())
            .then(
                move |ws: Ws, service: Arc<ChatService>, ctx: RequestContext, query: WsQuery| {
                    let hub = hub.clone();
                    async move {
                        let caller = match (ctx.caller, query.token) {
                            (Caller::Guest, Some(token)) => {
                                let header = format!("token {token}");
                                service.authenticate(Some(&header)).await
                            }
                            (caller, _) => caller,
                        };
                        match caller {
                            Caller::User(user) => ws
                                .on_upgrade(move |socket| handle_connection(socket, user, hub))
                                .into_response(),
                            Caller::Guest => error_response(&ChatError::AuthenticationRequired),
                        }
                    }
                },
            );

        get_chats
            .or(create_chat)
            .or(get_messages)
            .or(send_message)
            .or(mark_as_read)
            .or(participants)
            .or(users)
            .or(login)
            .or(signup)
            .or(ws_route)
            .recover(|rejection: Rejection| async move {
                Ok::<_, Infallible>(rejection_response(&rejection))
            })
            .with(cors(allowed_origins))
    }
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Resolves the caller and their address for every request.
fn with_context(
    service: Arc<ChatService>,
) -> impl Filter<Extract = (RequestContext,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::addr::remote())
        .then(
            move |auth: Option<String>, forwarded: Option<String>, remote: Option<SocketAddr>| {
                let service = service.clone();
                async move {
                    let caller = service.authenticate(auth.as_deref()).await;
                    RequestContext::new(caller, client_addr(forwarded.as_deref(), remote))
                }
            },
        )
}

fn cors(allowed_origins: &[String]) -> warp::cors::Builder {
    let valid: Vec<&str> = allowed_origins
        .iter()
        .map(String::as_str)
        .filter(|origin| {
            let ok = is_valid_origin(origin);
            if !ok {
                warn!("Ignoring invalid CORS origin {origin:?}");
            }
            ok
        })
        .collect();

    let builder = if valid.is_empty() {
        warp::cors().allow_any_origin()
    } else {
        warp::cors().allow_origins(valid)
    };
    builder
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type"])
}

fn is_valid_origin(origin: &str) -> bool {
    origin.parse::<Uri>().is_ok_and(|uri| {
        uri.scheme().is_some()
            && uri.authority().is_some()
            && matches!(uri.path(), "" | "/")
            && uri.query().is_none()
    })
}

/// First hop of `X-Forwarded-For`, else the socket peer, else `unknown`.
pub fn client_addr(forwarded: Option<&str>, remote: Option<SocketAddr>) -> String {
    forwarded
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ChatError::AccessDenied | ChatError::AuthenticationRequired => StatusCode::FORBIDDEN,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::AlreadyExists(_) => StatusCode::CONFLICT,
        ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &ChatError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {err}");
    }

    let mut response = error_body(status, &err.to_string());
    if let ChatError::RateLimited { limit, reset } = err {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(0u64));
        headers.insert("x-ratelimit-reset", HeaderValue::from(*reset));
        headers.insert("retry-after", HeaderValue::from(*reset));
    }
    response
}

fn error_body(status: StatusCode, message: &str) -> Response {
    let body = json!({ "error": { "message": message } });
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Renders requests that never reached a handler in the same error shape as handler failures.
fn rejection_response(rejection: &Rejection) -> Response {
    if rejection.is_not_found() {
        return error_body(StatusCode::NOT_FOUND, "Not found");
    }

    let err = if let Some(e) = rejection.find::<warp::body::BodyDeserializeError>() {
        ChatError::Validation(format!("Invalid request body: {e}"))
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        ChatError::Validation("Invalid query string".to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        ChatError::Validation(format!("Request body exceeds {MAX_BODY_BYTES} bytes"))
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        ChatError::Validation("Expected a JSON body".to_string())
    } else if let Some(e) = rejection.find::<warp::reject::MissingHeader>() {
        ChatError::Validation(e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidHeader>() {
        ChatError::Validation(e.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    } else {
        warn!("Unhandled rejection: {rejection:?}");
        ChatError::Store("Internal server error".to_string())
    };
    error_response(&err)
}

fn respond<T: Serialize>(result: Result<Admitted<T>, ChatError>) -> Response {
    match result {
        Ok(Admitted { value, admission }) => {
            let mut response = warp::reply::json(&value).into_response();
            if let Some(decision) = admission.rate {
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
                headers.insert(
                    "x-ratelimit-remaining",
                    HeaderValue::from(decision.remaining),
                );
            }
            response
        }
        Err(e) => error_response(&e),
    }
}

async fn get_chats(service: Arc<ChatService>, ctx: RequestContext) -> Response {
    respond(service.get_chats(&ctx).await)
}

async fn create_chat(
    service: Arc<ChatService>,
    ctx: RequestContext,
    body: CreateChatRequest,
) -> Response {
    let result = service.create_chat(&ctx, body).await;
    respond(result.map(|admitted| admitted.map(|name| CreatedChat { name })))
}

async fn get_messages(
    chat: String,
    service: Arc<ChatService>,
    ctx: RequestContext,
    query: MessagesQuery,
) -> Response {
    respond(service.get_messages(&ctx, &chat, query).await)
}

async fn send_message(
    chat: String,
    service: Arc<ChatService>,
    ctx: RequestContext,
    body: SendMessageRequest,
) -> Response {
    respond(service.send_message(&ctx, &chat, body).await)
}

async fn mark_as_read(chat: String, service: Arc<ChatService>, ctx: RequestContext) -> Response {
    respond(service.mark_as_read(&ctx, &chat).await)
}

async fn get_chat_participants(
    chat: String,
    service: Arc<ChatService>,
    ctx: RequestContext,
) -> Response {
    respond(service.get_chat_participants(&ctx, &chat).await)
}

async fn get_users(service: Arc<ChatService>, ctx: RequestContext) -> Response {
    respond(service.get_users(&ctx).await)
}

async fn login(service: Arc<ChatService>, ctx: RequestContext, body: LoginRequest) -> Response {
    respond(service.login(&ctx, &body.usr, &body.pwd).await)
}

async fn signup(service: Arc<ChatService>, ctx: RequestContext, body: SignupRequest) -> Response {
    respond(
        service
            .signup(&ctx, &body.email, &body.password, &body.full_name)
            .await,
    )
}

/// Registers the socket with the hub and forwards pushed events until either side closes.
async fn handle_connection(ws: WebSocket, user: String, hub: Arc<Hub>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session_id = hub.register(&user, tx).await;
    info!("Realtime session {session_id} opened for {user}");

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                warn!("Failed to send WebSocket message: {e}");
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) if msg.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for {user}: {e}");
                break;
            }
        }
    }

    hub.unregister(&user, &session_id).await;
    info!("Realtime session {session_id} closed for {user}");
}
