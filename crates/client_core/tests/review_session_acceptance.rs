use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use client_core::{
    Collaborators, ControllerError, ControllerPhase, ControllerSettings, HttpServices,
    LoadOutcome, SessionController,
};
use shared::{
    domain::{DocumentId, RiskLevel, SessionId, SuggestionLabel, UnitId, UnitStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        AnalysisRequest, AnalysisResult, ApplyChoiceRequest, RiskMetrics, SaveDraftRequest,
        SentenceUnit, Session, StartSessionRequest, SuggestionRequest, SuggestionSet,
        SuggestionVariant, ValidateCustomRequest, ValidationResult,
    },
};
use tokio::net::TcpListener;

const SESSION: i64 = 12;

struct Review {
    units: Vec<SentenceUnit>,
    position: u32,
    processed: u32,
    skipped: u32,
    completed: bool,
    suggestion_hits: HashMap<i64, usize>,
    choices: Vec<ApplyChoiceRequest>,
    drafts: Vec<(i64, String)>,
}

type Shared = Arc<Mutex<Review>>;

fn sentence(id: i64, text: &str) -> SentenceUnit {
    SentenceUnit {
        unit_id: UnitId(id),
        index: (id - 1) as u32,
        text: text.to_string(),
        metrics: RiskMetrics {
            risk_score: 0.6,
            risk_level: RiskLevel::Medium,
            required_terms: vec!["landlord".to_string()],
        },
        status: if id == 1 {
            UnitStatus::Current
        } else {
            UnitStatus::Pending
        },
    }
}

fn session_of(review: &Review) -> Session {
    Session {
        session_id: SessionId(SESSION),
        document_id: DocumentId(3),
        total_units: review.units.len() as u32,
        processed_count: review.processed,
        skipped_count: review.skipped,
        flagged_count: 0,
        position: review.position,
        current_unit: review.units.get(review.position as usize).cloned(),
        updated_at: Utc::now(),
    }
}

fn move_past(review: &mut Review, unit_id: UnitId, status: UnitStatus) {
    if let Some(unit) = review.units.iter_mut().find(|unit| unit.unit_id == unit_id) {
        if unit.status.is_resolved() {
            return;
        }
        unit.status = status;
    }
    match status {
        UnitStatus::Processed => review.processed += 1,
        UnitStatus::Skipped => review.skipped += 1,
        _ => {}
    }
    review.position += 1;
    if let Some(next) = review.units.get_mut(review.position as usize) {
        if next.status == UnitStatus::Pending {
            next.status = UnitStatus::Current;
        }
    }
}

async fn start(
    State(review): State<Shared>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<Session>, (StatusCode, Json<ApiError>)> {
    if request.document_id != DocumentId(3) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, "document not found")),
        ));
    }
    let review = review.lock().expect("review");
    Ok(Json(session_of(&review)))
}

async fn current(State(review): State<Shared>, Path(_id): Path<i64>) -> Json<Session> {
    let review = review.lock().expect("review");
    Json(session_of(&review))
}

async fn skip(State(review): State<Shared>, Path(_id): Path<i64>) -> Json<Session> {
    let mut review = review.lock().expect("review");
    let unit_id = review.units[review.position as usize].unit_id;
    move_past(&mut review, unit_id, UnitStatus::Skipped);
    Json(session_of(&review))
}

async fn complete(State(review): State<Shared>, Path(_id): Path<i64>) -> StatusCode {
    review.lock().expect("review").completed = true;
    StatusCode::NO_CONTENT
}

async fn choose(
    State(review): State<Shared>,
    Path(_id): Path<i64>,
    Json(request): Json<ApplyChoiceRequest>,
) -> StatusCode {
    let mut review = review.lock().expect("review");
    move_past(&mut review, request.unit_id, UnitStatus::Processed);
    review.choices.push(request);
    StatusCode::NO_CONTENT
}

async fn units(State(review): State<Shared>, Path(_id): Path<i64>) -> Json<Vec<SentenceUnit>> {
    Json(review.lock().expect("review").units.clone())
}

async fn suggest(
    State(review): State<Shared>,
    Json(request): Json<SuggestionRequest>,
) -> Json<SuggestionSet> {
    let unit_id = request.context.unit_id;
    *review
        .lock()
        .expect("review")
        .suggestion_hits
        .entry(unit_id.0)
        .or_default() += 1;
    // Unit 1 is slow so a later selection overtakes it.
    if unit_id == UnitId(1) {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    Json(SuggestionSet {
        unit_id,
        variants: vec![
            SuggestionVariant {
                label: SuggestionLabel::Generated,
                text: format!("{} where reasonable", request.text.trim_end_matches('.')),
                predicted_risk: 0.2,
                similarity: 0.9,
                explanation: "qualified the obligation".to_string(),
            },
            SuggestionVariant {
                label: SuggestionLabel::RuleBased,
                text: request.text.replace("shall", "should"),
                predicted_risk: 0.3,
                similarity: 0.95,
                explanation: "modal verb softened".to_string(),
            },
        ],
    })
}

async fn validate(
    Path((_id, _unit)): Path<(i64, i64)>,
    Json(request): Json<ValidateCustomRequest>,
) -> Json<ValidationResult> {
    let passed = request.draft_text.contains("landlord");
    Json(ValidationResult {
        passed,
        similarity: if passed { 0.84 } else { 0.2 },
        message: if passed {
            "ok".to_string()
        } else {
            "required term 'landlord' missing".to_string()
        },
        missing_terms: if passed {
            Vec::new()
        } else {
            vec!["landlord".to_string()]
        },
    })
}

async fn analyze(Json(request): Json<AnalysisRequest>) -> Json<AnalysisResult> {
    Json(AnalysisResult {
        summary: "obligation".to_string(),
        clauses: vec![request.text],
        complexity: 0.3,
    })
}

async fn draft(
    State(review): State<Shared>,
    Path((_id, unit)): Path<(i64, i64)>,
    Json(request): Json<SaveDraftRequest>,
) -> StatusCode {
    review
        .lock()
        .expect("review")
        .drafts
        .push((unit, request.text));
    StatusCode::NO_CONTENT
}

async fn spawn_review_service() -> (String, Shared) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let review: Shared = Arc::new(Mutex::new(Review {
        units: vec![
            sentence(1, "The landlord shall inspect without notice."),
            sentence(2, "The landlord shall keep the deposit."),
            sentence(3, "The landlord shall set the rent."),
            sentence(4, "The landlord shall choose the contractor."),
        ],
        position: 0,
        processed: 0,
        skipped: 0,
        completed: false,
        suggestion_hits: HashMap::new(),
        choices: Vec::new(),
        drafts: Vec::new(),
    }));
    let app = Router::new()
        .route("/sessions", post(start))
        .route("/sessions/:id", get(current))
        .route("/sessions/:id/skip", post(skip))
        .route("/sessions/:id/complete", post(complete))
        .route("/sessions/:id/choices", post(choose))
        .route("/sessions/:id/units", get(units))
        .route("/sessions/:id/units/:unit/validate", post(validate))
        .route("/sessions/:id/units/:unit/draft", put(draft))
        .route("/suggestions", post(suggest))
        .route("/analysis", post(analyze))
        .with_state(review.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), review)
}

fn controller_for(base_url: &str) -> Arc<SessionController> {
    let settings = ControllerSettings {
        service_url: base_url.to_string(),
        draft_debounce: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        ..ControllerSettings::default()
    };
    let services = HttpServices::new(&settings.service_url, settings.request_timeout)
        .expect("http services");
    SessionController::new(Collaborators::from_backend(Arc::new(services)), settings)
}

#[tokio::test]
async fn review_walkthrough_over_http_acceptance() {
    let (base_url, review) = spawn_review_service().await;
    let controller = controller_for(&base_url);

    controller
        .start(DocumentId(3), Default::default())
        .await
        .expect("start");
    let units = controller.refresh_units().await.expect("units");
    assert_eq!(units.len(), 4);

    // Rapid navigation: unit 1 is slow, unit 2 answers first and must stay displayed.
    let slow = {
        let controller = Arc::clone(&controller);
        let unit = units[0].clone();
        tokio::spawn(async move { controller.select_unit(unit).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fast = controller
        .select_unit(units[1].clone())
        .await
        .expect("unit 2");
    assert!(matches!(fast, LoadOutcome::Fetched(_)));
    assert_eq!(
        slow.await.expect("join").expect("unit 1"),
        LoadOutcome::Superseded
    );
    let snapshot = controller.snapshot().await;
    assert_eq!(
        snapshot.suggestions.as_ref().map(|set| set.unit_id),
        Some(UnitId(2))
    );

    // Revisit: unit 3 then back to unit 2 is served from the cache.
    controller
        .select_unit(units[2].clone())
        .await
        .expect("unit 3");
    let back = controller
        .select_unit(units[1].clone())
        .await
        .expect("back to unit 2");
    assert!(matches!(back, LoadOutcome::Cached(_)));
    assert_eq!(review.lock().expect("review").suggestion_hits[&2], 1);

    // Unvalidated custom text never reaches the session service.
    controller
        .edit_draft("The tenant keeps the deposit.")
        .await
        .expect("draft");
    assert_eq!(
        controller.apply_custom().await.expect_err("not validated"),
        ControllerError::ValidationRequired
    );
    let failed = controller
        .validate_custom("The tenant keeps the deposit.")
        .await
        .expect("validate");
    assert!(!failed.passed);
    assert!(review.lock().expect("review").choices.is_empty());

    // A passing validation unlocks the commit.
    controller
        .edit_draft("The landlord returns the deposit.")
        .await
        .expect("draft");
    let passed = controller
        .validate_custom("The landlord returns the deposit.")
        .await
        .expect("validate");
    assert!(passed.passed);
    let session = controller.apply_custom().await.expect("commit custom");
    assert_eq!(session.processed_count, 1);
    assert_eq!(controller.units().await[1].status, UnitStatus::Processed);
    {
        let review = review.lock().expect("review");
        assert_eq!(review.choices.len(), 1);
        assert_eq!(review.choices[0].label, SuggestionLabel::Custom);
        assert_eq!(review.choices[0].text, "The landlord returns the deposit.");
        assert!(review
            .drafts
            .iter()
            .any(|(unit, text)| *unit == 2 && text == "The landlord returns the deposit."));
    }

    // Apply a generated suggestion for unit 1.
    controller
        .select_unit(units[0].clone())
        .await
        .expect("unit 1");
    let session = controller
        .apply_suggestion(SuggestionLabel::Generated)
        .await
        .expect("apply");
    assert_eq!(session.processed_count, 2);
    assert_eq!(controller.units().await[0].status, UnitStatus::Processed);
    assert!(controller.snapshot().await.active_unit.is_none());

    controller.complete().await.expect("complete");
    assert!(review.lock().expect("review").completed);
    assert_eq!(controller.snapshot().await.phase, ControllerPhase::Completed);
    controller.shutdown().await;
}

#[tokio::test]
async fn unknown_document_fails_the_session_start() {
    let (base_url, _review) = spawn_review_service().await;
    let controller = controller_for(&base_url);

    let err = controller
        .start(DocumentId(99), Default::default())
        .await
        .expect_err("missing document");
    assert!(matches!(err, ControllerError::SessionStart(ref message) if message.contains("document not found")));
    assert_eq!(controller.snapshot().await.phase, ControllerPhase::Error);
}
