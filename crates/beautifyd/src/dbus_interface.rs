use crate::recommend::{self, RecommendError, Recommender, TimeOfDay};
use crate::session::{SessionError, SessionHandle};
use beautify_core::stickers::CATALOG;
use beautify_core::{BoundingBox, FilterId, LandmarkMode, OverlayToggles, Point};
use std::sync::Arc;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.freedesktop.Beautify1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Beautify1";

fn session_error(e: SessionError) -> fdo::Error {
    match e {
        SessionError::PermissionDenied(msg) => fdo::Error::AccessDenied(msg),
        SessionError::NoDevice(msg) => fdo::Error::FileNotFound(msg),
        SessionError::Sticker(e) => fdo::Error::InvalidArgs(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn recommend_error(e: RecommendError) -> fdo::Error {
    match e {
        RecommendError::Disabled => fdo::Error::NotSupported(e.to_string()),
        RecommendError::InvalidKey => fdo::Error::AuthFailed(e.to_string()),
        RecommendError::RateLimited => fdo::Error::LimitsExceeded(e.to_string()),
        RecommendError::Other(msg) => fdo::Error::Failed(msg),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn parse_overlays(
    bounding_boxes: bool,
    landmarks: &str,
    expressions: bool,
    face_matching: bool,
) -> fdo::Result<OverlayToggles> {
    let landmarks = LandmarkMode::from_name(landmarks)
        .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown landmark mode: {landmarks}")))?;
    Ok(OverlayToggles {
        bounding_boxes,
        landmarks,
        expressions,
        face_matching,
    })
}

/// D-Bus interface for the beautify daemon.
///
/// Bus name: org.freedesktop.Beautify1
/// Object path: /org/freedesktop/Beautify1
pub struct BeautifyService {
    session: SessionHandle,
    recommender: Arc<dyn Recommender>,
    ai_enabled: bool,
}

impl BeautifyService {
    /// `ai_enabled` reflects whether an API key is configured.
    pub fn new(session: SessionHandle, recommender: Arc<dyn Recommender>, ai_enabled: bool) -> Self {
        Self {
            session,
            recommender,
            ai_enabled,
        }
    }

    async fn recommendation(&self, vision: bool) -> Result<String, RecommendError> {
        if !self.ai_enabled {
            return Err(RecommendError::Disabled);
        }
        if !vision {
            let prompt = recommend::filter_prompt(TimeOfDay::now());
            return recommend::request(self.recommender.clone(), prompt, None).await;
        }

        let frame = self
            .session
            .clean_frame()
            .await
            .map_err(|e| RecommendError::Other(e.to_string()))?;
        let image = tokio::task::spawn_blocking(move || recommend::encode_frame(&frame))
            .await
            .map_err(|e| RecommendError::Other(e.to_string()))?
            .map_err(|e| RecommendError::Other(e.to_string()))?;
        recommend::request(self.recommender.clone(), recommend::vision_prompt(), Some(image)).await
    }
}

#[interface(name = "org.freedesktop.Beautify1")]
impl BeautifyService {
    /// Acquire the camera and start rendering.
    async fn start_camera(&self) -> fdo::Result<()> {
        tracing::info!("start_camera requested");
        self.session.start().await.map_err(session_error)
    }

    /// Stop both loops, release the camera and reset the filter.
    async fn stop_camera(&self) -> fdo::Result<()> {
        tracing::info!("stop_camera requested");
        self.session.stop().await.map_err(session_error)
    }

    /// Select a filter. Unknown ids fall back to "none"; intensity is
    /// clamped to 0..=100. Returns the resulting CSS filter string.
    async fn set_filter(&self, filter: &str, intensity: i32, beauty: bool) -> fdo::Result<String> {
        let spec = self
            .session
            .set_filter(filter, intensity, beauty)
            .await
            .map_err(session_error)?;
        Ok(spec.adjustments().to_css())
    }

    /// `landmarks` is one of "off", "plain" or "groups".
    async fn set_overlays(
        &self,
        bounding_boxes: bool,
        landmarks: &str,
        expressions: bool,
        face_matching: bool,
    ) -> fdo::Result<()> {
        let overlays = parse_overlays(bounding_boxes, landmarks, expressions, face_matching)?;
        self.session.set_overlays(overlays).await.map_err(session_error)
    }

    async fn set_detection(&self, enabled: bool) -> fdo::Result<()> {
        tracing::info!(enabled, "set_detection requested");
        self.session.set_detection(enabled).await.map_err(session_error)
    }

    /// Use the single face in view as the match reference.
    async fn capture_reference(&self) -> fdo::Result<()> {
        tracing::info!("capture_reference requested");
        self.session.capture_reference().await.map_err(session_error)
    }

    async fn clear_reference(&self) -> fdo::Result<()> {
        self.session.clear_reference().await.map_err(session_error)
    }

    /// Place a sticker from the catalog. Returns the placement id.
    async fn add_sticker(&self, template_id: &str) -> fdo::Result<String> {
        self.session.add_sticker(template_id).await.map_err(session_error)
    }

    async fn remove_sticker(&self, id: &str) -> fdo::Result<()> {
        self.session.remove_sticker(id).await.map_err(session_error)
    }

    /// Pointer and container are in the same client coordinate space.
    async fn begin_drag(
        &self,
        id: &str,
        pointer_x: f64,
        pointer_y: f64,
        container_x: f64,
        container_y: f64,
        container_width: f64,
        container_height: f64,
    ) -> fdo::Result<()> {
        let pointer = Point::new(pointer_x as f32, pointer_y as f32);
        let container = BoundingBox::new(
            container_x as f32,
            container_y as f32,
            container_width as f32,
            container_height as f32,
        );
        self.session
            .begin_drag(id, pointer, container)
            .await
            .map_err(session_error)
    }

    /// Returns the clamped (x, y) percentages.
    async fn drag_to(
        &self,
        pointer_x: f64,
        pointer_y: f64,
        container_x: f64,
        container_y: f64,
        container_width: f64,
        container_height: f64,
    ) -> fdo::Result<(f64, f64)> {
        let pointer = Point::new(pointer_x as f32, pointer_y as f32);
        let container = BoundingBox::new(
            container_x as f32,
            container_y as f32,
            container_width as f32,
            container_height as f32,
        );
        let (x, y) = self
            .session
            .drag_to(pointer, container)
            .await
            .map_err(session_error)?;
        Ok((x as f64, y as f64))
    }

    /// Returns the id that was being dragged, or "" when none was.
    async fn end_drag(&self) -> fdo::Result<String> {
        let id = self.session.end_drag().await.map_err(session_error)?;
        Ok(id.unwrap_or_default())
    }

    async fn list_stickers(&self) -> fdo::Result<String> {
        let stickers = self.session.list_stickers().await.map_err(session_error)?;
        to_json(&stickers)
    }

    async fn list_sticker_templates(&self) -> fdo::Result<String> {
        to_json(&CATALOG)
    }

    async fn list_filters(&self) -> fdo::Result<String> {
        let filters: Vec<_> = FilterId::ALL
            .iter()
            .map(|f| serde_json::json!({ "id": f.id(), "name": f.name(), "icon": f.icon() }))
            .collect();
        to_json(&filters)
    }

    /// Save a still of the displayed frame plus stickers. Returns the path.
    async fn capture(&self) -> fdo::Result<String> {
        tracing::info!("capture requested");
        let path = self.session.capture().await.map_err(session_error)?;
        Ok(path.display().to_string())
    }

    /// Ask the configured model for filter advice. With `vision`, the
    /// current clean frame is sent along.
    async fn recommend(&self, vision: bool) -> fdo::Result<String> {
        tracing::info!(vision, "recommendation requested");
        self.recommendation(vision).await.map_err(recommend_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.session.status().await.map_err(session_error)?;
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "ai_enabled": self.ai_enabled,
            "session": status,
        }))
    }

    /// Emitted when the number of detected faces changes.
    #[zbus(signal)]
    pub async fn faces_changed(emitter: &SignalEmitter<'_>, count: u32) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportSink;
    use crate::session::{spawn_session, Session, SessionSettings};
    use crate::testing::{ScriptedProvider, ScriptedSource};
    use beautify_core::{ReferenceError, StickerError, UnloadedDetector};
    use std::sync::Mutex;

    struct Canned {
        prompts: Mutex<Vec<(String, bool)>>,
    }

    impl Recommender for Canned {
        fn generate(&self, prompt: &str, image: Option<&str>) -> Result<String, RecommendError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), image.is_some()));
            Ok("Sunset".into())
        }
    }

    fn service(ai_enabled: bool, recommender: Arc<dyn Recommender>) -> BeautifyService {
        let source = Arc::new(ScriptedSource::ready(32, 24));
        let config = crate::config::Config::default();
        let session = Session::new(
            Arc::new(ScriptedProvider::granting(source)),
            Arc::new(UnloadedDetector),
            SessionSettings::from(&config),
            ExportSink::new(std::env::temp_dir()),
        );
        BeautifyService::new(spawn_session(session), recommender, ai_enabled)
    }

    #[test]
    fn test_session_error_mapping() {
        assert!(matches!(
            session_error(SessionError::PermissionDenied("denied".into())),
            fdo::Error::AccessDenied(_)
        ));
        assert!(matches!(
            session_error(SessionError::Sticker(StickerError::NoActiveDrag)),
            fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            session_error(SessionError::Reference(ReferenceError::NoFace)),
            fdo::Error::Failed(_)
        ));
    }

    #[test]
    fn test_recommend_error_mapping() {
        assert!(matches!(recommend_error(RecommendError::Disabled), fdo::Error::NotSupported(_)));
        assert!(matches!(recommend_error(RecommendError::InvalidKey), fdo::Error::AuthFailed(_)));
        assert!(matches!(recommend_error(RecommendError::RateLimited), fdo::Error::LimitsExceeded(_)));
    }

    #[test]
    fn test_parse_overlays() {
        let o = parse_overlays(true, "groups", false, true).unwrap();
        assert!(o.bounding_boxes && o.face_matching);
        assert_eq!(o.landmarks, LandmarkMode::Groups);
        assert!(matches!(parse_overlays(false, "sparkly", false, false), Err(fdo::Error::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_recommend_requires_api_key() {
        let canned = Arc::new(Canned { prompts: Mutex::new(Vec::new()) });
        let svc = service(false, canned.clone());
        assert_eq!(svc.recommendation(false).await, Err(RecommendError::Disabled));
        assert!(canned.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_and_vision_recommendations() {
        let canned = Arc::new(Canned { prompts: Mutex::new(Vec::new()) });
        let svc = service(true, canned.clone());

        assert_eq!(svc.recommendation(false).await.unwrap(), "Sunset");

        let err = svc.recommendation(true).await.unwrap_err();
        assert!(matches!(err, RecommendError::Other(_)));

        svc.session.start().await.unwrap();
        assert_eq!(svc.recommendation(true).await.unwrap(), "Sunset");

        let prompts = canned.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].1 && prompts[0].0.contains("during the"));
        assert!(prompts[1].1 && prompts[1].0.contains("Skin Analysis"));
        drop(prompts);
        svc.session.stop().await.unwrap();
    }
}
