//! REST surface over the step runtime

use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use serde::Deserialize;
use std::sync::Arc;
use stepcore::{FlowError, Variables, Workflow, WorkflowError};
use stepruntime::{HandlerRegistry, RuntimeConfig, StepRuntime};
use tracing::{error, info};

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<StepRuntime>,
}

impl AppState {
    pub fn new(runtime: StepRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }
}

/// Runtime with the standard step library registered
pub fn build_runtime(config: RuntimeConfig) -> StepRuntime {
    let mut registry = HandlerRegistry::new();
    stepactions::register_all(&mut registry);
    StepRuntime::with_registry(Arc::new(registry), config)
}

/// Register every route on an actix app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(validate_workflow)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(update_workflow)
        .service(delete_workflow)
        .service(duplicate_workflow)
        .service(start_execution)
        .service(list_workflow_executions)
        .service(list_running_executions)
        .service(get_execution)
        .service(execution_logs)
        .service(pause_execution)
        .service(resume_execution)
        .service(cancel_execution)
        .service(list_step_types)
        .service(statistics);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowQuery {
    q: Option<String>,
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DuplicateRequest {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartRequest {
    user_id: Option<String>,
    variables: Variables,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsQuery {
    workflow_id: Option<String>,
}

fn error_response(err: &FlowError) -> HttpResponse {
    let body = |message: String| serde_json::json!({ "error": message });
    match err {
        FlowError::Workflow(WorkflowError::Invalid(errors)) => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation failed",
                "errors": errors,
            }))
        }
        e if e.is_not_found() => HttpResponse::NotFound().json(body(e.to_string())),
        FlowError::Workflow(e) => HttpResponse::BadRequest().json(body(e.to_string())),
        FlowError::AdmissionRejected { .. } => {
            HttpResponse::TooManyRequests().json(body(err.to_string()))
        }
        e => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body(e.to_string()))
        }
    }
}

fn conflict(execution_id: &str, action: &str) -> HttpResponse {
    HttpResponse::Conflict().json(serde_json::json!({
        "error": format!("Cannot {} execution {} in its current state", action, execution_id),
    }))
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stepflow"
    }))
}

#[post("/api/workflows/validate")]
async fn validate_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.definitions().validate(&workflow))
}

/// List workflows, optionally filtered by a search term or creator
#[get("/api/workflows")]
async fn list_workflows(
    data: web::Data<AppState>,
    query: web::Query<WorkflowQuery>,
) -> HttpResponse {
    let definitions = data.runtime.definitions();
    let result = match (&query.q, &query.created_by) {
        (Some(q), _) => definitions.search(q).await,
        (None, Some(user)) => definitions.by_creator(user).await,
        (None, None) => definitions.list().await,
    };

    match result {
        Ok(workflows) => {
            let summaries: Vec<_> = workflows
                .iter()
                .map(|w| {
                    serde_json::json!({
                        "id": w.id,
                        "name": w.name,
                        "description": w.description,
                        "steps": w.steps.len(),
                        "edges": w.edges.len(),
                        "createdBy": w.created_by,
                        "updatedAt": w.updated_at,
                    })
                })
                .collect();
            HttpResponse::Ok().json(summaries)
        }
        Err(e) => error_response(&e),
    }
}

#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> HttpResponse {
    match data.runtime.definitions().create(workflow.into_inner()).await {
        Ok(created) => {
            info!("Created workflow: {} ({})", created.name, created.id);
            HttpResponse::Created().json(created)
        }
        Err(e) => error_response(&e),
    }
}

#[get("/api/workflows/{id}")]
async fn get_workflow(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match data.runtime.definitions().get(&path).await {
        Ok(workflow) => HttpResponse::Ok().json(workflow),
        Err(e) => error_response(&e),
    }
}

#[put("/api/workflows/{id}")]
async fn update_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    workflow: web::Json<Workflow>,
) -> HttpResponse {
    match data
        .runtime
        .definitions()
        .update(&path, workflow.into_inner())
        .await
    {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(e) => error_response(&e),
    }
}

#[delete("/api/workflows/{id}")]
async fn delete_workflow(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match data.runtime.definitions().delete(&path).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Workflow deleted successfully"
        })),
        Ok(false) => error_response(&WorkflowError::NotFound(path.into_inner()).into()),
        Err(e) => error_response(&e),
    }
}

#[post("/api/workflows/{id}/duplicate")]
async fn duplicate_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<DuplicateRequest>,
) -> HttpResponse {
    match data.runtime.definitions().duplicate(&path, &req.name).await {
        Ok(copy) => HttpResponse::Created().json(copy),
        Err(e) => error_response(&e),
    }
}

/// Start a run; responds as soon as the run is admitted
#[post("/api/workflows/{id}/executions")]
async fn start_execution(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<StartRequest>>,
) -> HttpResponse {
    let req = req.map(|r| r.into_inner()).unwrap_or_default();
    let user = req.user_id.as_deref().unwrap_or("anonymous");

    match data.runtime.start_run(&path, user, req.variables).await {
        Ok(execution) => HttpResponse::Accepted().json(execution),
        Err(e) => error_response(&e),
    }
}

#[get("/api/workflows/{id}/executions")]
async fn list_workflow_executions(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    match data.runtime.runs().list_by_workflow(&path).await {
        Ok(runs) => HttpResponse::Ok().json(runs),
        Err(e) => error_response(&e),
    }
}

#[get("/api/executions")]
async fn list_running_executions(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.runs().list_running().await)
}

#[get("/api/executions/{id}")]
async fn get_execution(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match data.runtime.get_run(&path).await {
        Ok(execution) => HttpResponse::Ok().json(execution),
        Err(e) => error_response(&e),
    }
}

#[get("/api/executions/{id}/logs")]
async fn execution_logs(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<LogsQuery>,
) -> HttpResponse {
    match data
        .runtime
        .runs()
        .logs(&path, query.limit.unwrap_or(0))
        .await
    {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(e) => error_response(&e),
    }
}

#[post("/api/executions/{id}/pause")]
async fn pause_execution(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    if let Err(e) = data.runtime.runs().status(&path).await {
        return error_response(&e);
    }
    if data.runtime.pause(&path).await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "paused" }))
    } else {
        conflict(&path, "pause")
    }
}

#[post("/api/executions/{id}/resume")]
async fn resume_execution(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    if let Err(e) = data.runtime.runs().status(&path).await {
        return error_response(&e);
    }
    if data.runtime.resume(&path).await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "running" }))
    } else {
        conflict(&path, "resume")
    }
}

#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<CancelRequest>>,
) -> HttpResponse {
    if let Err(e) = data.runtime.runs().status(&path).await {
        return error_response(&e);
    }
    let reason = req
        .and_then(|r| r.into_inner().reason)
        .unwrap_or_else(|| "Cancelled by user".to_string());

    if data.runtime.cancel(&path, &reason).await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "cancelled" }))
    } else {
        conflict(&path, "cancel")
    }
}

/// List available step types
#[get("/api/step-types")]
async fn list_step_types(data: web::Data<AppState>) -> impl Responder {
    let handlers = data.runtime.handlers();
    let types: Vec<_> = handlers
        .list_step_types()
        .into_iter()
        .map(|step_type| {
            serde_json::json!({
                "description": handlers.describe(&step_type).unwrap_or_default(),
                "type": step_type,
            })
        })
        .collect();
    HttpResponse::Ok().json(types)
}

#[get("/api/statistics")]
async fn statistics(
    data: web::Data<AppState>,
    query: web::Query<StatisticsQuery>,
) -> impl Responder {
    let runs = data.runtime.runs();
    let stats = runs.statistics(query.workflow_id.as_deref()).await;
    HttpResponse::Ok().json(serde_json::json!({
        "executions": stats,
        "successRate": stats.success_rate(),
        "failureRate": stats.failure_rate(),
        "activeExecutions": runs.active_count().await,
        "maxActiveExecutions": runs.max_active(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use stepcore::{Execution, ExecutionStatus, Step};

    fn state(max_active: usize) -> web::Data<AppState> {
        web::Data::new(AppState::new(build_runtime(
            RuntimeConfig::default().with_max_active_executions(max_active),
        )))
    }

    fn sample(name: &str) -> Workflow {
        let mut wf = Workflow::new(name);
        wf.id = String::new();
        wf.add_step(Step::start()).unwrap();
        wf.add_step(
            Step::new("set", "variables.set").with_data("assign", json!({ "greeting": "hi" })),
        )
        .unwrap();
        wf.add_step(Step::end()).unwrap();
        wf.connect("start", "set").unwrap();
        wf.connect("set", "end").unwrap();
        wf
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let app = test::init_service(App::new().app_data(state(1)).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn create_then_fetch_workflow() {
        let app = test::init_service(App::new().app_data(state(1)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(sample("Greeting"))
            .to_request();
        let created: Workflow = test::call_and_read_body_json(&app, req).await;
        assert!(created.id.starts_with("workflow-"));

        let req = test::TestRequest::get()
            .uri(&format!("/api/workflows/{}", created.id))
            .to_request();
        let fetched: Workflow = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched.name, "Greeting");
    }

    #[actix_web::test]
    async fn invalid_workflow_is_bad_request() {
        let app = test::init_service(App::new().app_data(state(1)).configure(configure)).await;
        let mut wf = sample("");
        wf.connect("set", "ghost").unwrap();

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(&wf)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        let errors = body["errors"].as_array().unwrap();
        assert!(errors.contains(&json!("Workflow name is required")));
        assert!(errors.contains(&json!("Edge target not found: ghost")));
    }

    #[actix_web::test]
    async fn missing_things_are_not_found() {
        let app = test::init_service(App::new().app_data(state(1)).configure(configure)).await;
        for uri in ["/api/workflows/nope", "/api/executions/nope"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
        let req = test::TestRequest::post()
            .uri("/api/executions/nope/pause")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn run_completes_and_refuses_late_pause() {
        let data = state(2);
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(sample("Greeting"))
            .to_request();
        let created: Workflow = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/workflows/{}/executions", created.id))
            .set_json(json!({ "userId": "alice" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let started: Execution = test::read_body_json(resp).await;

        let done = data.runtime.runs().wait_for(&started.id).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.variables["greeting"], json!("hi"));

        let req = test::TestRequest::post()
            .uri(&format!("/api/executions/{}/pause", started.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/api/executions/{}/logs?limit=1", started.id))
            .to_request();
        let logs: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["message"], json!("Workflow execution completed successfully"));
    }

    #[actix_web::test]
    async fn admission_cap_maps_to_too_many_requests() {
        let app = test::init_service(App::new().app_data(state(0)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(sample("Greeting"))
            .to_request();
        let created: Workflow = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/workflows/{}/executions", created.id))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[actix_web::test]
    async fn step_types_include_builtins() {
        let app = test::init_service(App::new().app_data(state(1)).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/step-types").to_request();
        let types: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert!(types.iter().any(|t| t["type"] == json!("ai.generate")));
        assert!(types.iter().any(|t| t["type"] == json!("startEnd")));
    }
}
