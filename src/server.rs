use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::handler::{ImageInput, RequestHandler, RequestTracker};
use crate::io_struct::{
    ClassesResponse, HealthResponse, InputSize, ModelInfoResponse, PredictPathRequest,
    PredictResponse, PreprocessingInfo,
};
use crate::oracle::OracleState;
use crate::upload::{UploadError, UploadPolicy};
use actix_multipart::Multipart;
use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, ResponseError, get, http::header, middleware,
    routes, web,
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;
const JSON_BODY_LIMIT: usize = 64 * 1024;

pub struct AppState {
    pub handler: RequestHandler,
    info: ModelInfoResponse,
    health_message: String,
}

impl AppState {
    pub fn new(config: &ServerConfig, handler: RequestHandler) -> Self {
        let info = ModelInfoResponse {
            title: config.title.clone(),
            description: config.description.clone(),
            instructions: config.instructions.clone(),
            model_name: config.model_name.clone(),
            classes: handler.labels().as_slice().to_vec(),
            input_size: InputSize {
                height: config.preprocess.target_height,
                width: config.preprocess.target_width,
            },
            preprocessing: PreprocessingInfo::from(&config.preprocess),
            model_loaded: handler.oracle().is_ready(),
        };
        Self {
            handler,
            info,
            health_message: format!("{} is running.", config.title),
        }
    }
}

fn content_length(req: &HttpRequest) -> Option<u64> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

async fn read_multipart(
    req: &HttpRequest,
    payload: web::Payload,
    uploads: &UploadPolicy,
) -> Result<ImageInput, ApiError> {
    let mut multipart = Multipart::new(req.headers(), payload);
    while let Some(field) = multipart.next().await {
        let mut field =
            field.map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {}", e)))?;

        if field.name() != Some("file") {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| {
                    ApiError::BadRequest(format!("Invalid multipart payload: {}", e))
                })?;
            }
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        uploads.check_filename(&filename)?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk
                .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {}", e)))?;
            uploads.check_size((buf.len() + chunk.len()) as u64)?;
            buf.extend_from_slice(&chunk);
        }
        return Ok(ImageInput::Upload {
            filename,
            bytes: buf.freeze(),
        });
    }
    Err(UploadError::NoFile.into())
}

async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Bytes, ApiError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))?;
        if body.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "Payload exceeds limit of {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Anything that is not a multipart upload is read as `{"image_path": ...}`.
/// Unparseable bodies are treated as carrying no image at all.
async fn read_path_request(payload: web::Payload) -> Result<ImageInput, ApiError> {
    let body = read_body(payload, JSON_BODY_LIMIT).await?;
    serde_json::from_slice::<PredictPathRequest>(&body)
        .ok()
        .and_then(|r| r.image_path)
        .map(ImageInput::Path)
        .ok_or_else(|| UploadError::NoFile.into())
}

async fn read_input(
    req: &HttpRequest,
    payload: web::Payload,
    uploads: &UploadPolicy,
) -> Result<ImageInput, ApiError> {
    if let Some(len) = content_length(req) {
        if len > uploads.max_bytes() + MULTIPART_OVERHEAD {
            return Err(UploadError::TooLarge {
                limit: uploads.max_bytes(),
            }
            .into());
        }
    }

    if is_multipart(req) {
        read_multipart(req, payload, uploads).await
    } else {
        read_path_request(payload).await
    }
}

#[routes]
#[post("/predict")]
#[post("/api/predict")]
async fn predict(
    req: HttpRequest,
    payload: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let handler = &app_state.handler;
    let mut tracker = RequestTracker::new();
    let classifier = handler.ready_classifier(&mut tracker)?;

    let input = match read_input(&req, payload, handler.uploads()).await {
        Ok(input) => input,
        Err(e) => {
            tracker.fail(&e);
            return Err(e);
        }
    };

    let prediction = handler.predict(&mut tracker, classifier, input).await?;
    log::info!(
        "[req {}] predicted {} ({:.2}%)",
        tracker.id(),
        prediction.predicted_class,
        prediction.confidence
    );
    Ok(HttpResponse::Ok().json(PredictResponse::new(prediction)))
}

#[get("/api/info")]
async fn model_info(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(&app_state.info)
}

#[get("/api/classes")]
async fn classes(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ClassesResponse {
        classes: app_state.handler.labels().as_slice().to_vec(),
    })
}

#[routes]
#[get("/")]
#[get("/health")]
async fn health(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        message: app_state.health_message.clone(),
        model_loaded: app_state.handler.oracle().is_ready(),
    })
}

async fn not_found(mut payload: web::Payload) -> HttpResponse {
    while let Some(chunk) = payload.next().await {
        if let Err(err) = chunk {
            log::debug!("Error while draining payload: {:?}", err);
            break;
        }
    }
    ApiError::not_found().error_response()
}

/// Register every route. Shared by [`startup`] and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(predict)
        .service(model_info)
        .service(classes)
        .service(health)
        .default_service(web::route().to(not_found));
}

pub async fn startup(config: ServerConfig, oracle: OracleState) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let handler = RequestHandler::new(&config, oracle).map_err(std::io::Error::other)?;
    let app_state = web::Data::new(AppState::new(&config, handler));

    log::info!("Starting server at {}:{}", config.host, config.port);
    log::info!("Labels: {:?}", config.labels);
    log::info!(
        "Input {}x{}, {} normalization, {} channel order",
        config.preprocess.target_width,
        config.preprocess.target_height,
        config.preprocess.normalization.name(),
        config.preprocess.channel_order
    );
    log::info!(
        "Max upload size: {} MB",
        config.max_upload_bytes / (1024 * 1024)
    );
    if !app_state.handler.oracle().is_ready() {
        log::warn!("Serving without a model; /predict will answer 503");
    }

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind((config.host, config.port))?.run().await
}
