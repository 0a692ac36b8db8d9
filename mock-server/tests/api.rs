use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, AppState, DEFAULT_API_KEY};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn api_request(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("mainzellisteApiKey", DEFAULT_API_KEY)
        .header("mainzellisteApiVersion", "3.0")
}

fn empty(method: &str, uri: &str) -> Request<String> {
    api_request(method, uri).body(String::new()).unwrap()
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<String> {
    api_request(method, uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn form_request(uri: &str, body: &str) -> Request<String> {
    api_request("POST", uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body.to_string())
        .unwrap()
}

async fn session(state: &AppState) -> String {
    let resp = app(state.clone()).oneshot(empty("POST", "/sessions")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    body_json(resp).await["sessionId"].as_str().unwrap().to_string()
}

async fn token(state: &AppState, session_id: &str, token: Value) -> String {
    let resp = app(state.clone())
        .oneshot(json_request("POST", &format!("/sessions/{session_id}/tokens"), &token))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    body_json(resp).await["id"].as_str().unwrap().to_string()
}

// --- headers ---

#[tokio::test]
async fn missing_api_key_returns_401() {
    let resp = app(AppState::default())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .header("mainzellisteApiVersion", "3.0")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(!body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn missing_api_version_returns_400() {
    let resp = app(AppState::default())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .header("mainzellisteApiKey", DEFAULT_API_KEY)
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- sessions ---

#[tokio::test]
async fn create_and_delete_session() {
    let state = AppState::default();
    let session_id = session(&state).await;
    assert_eq!(state.session_count().await, 1);

    let resp = app(state.clone())
        .oneshot(empty("DELETE", &format!("/sessions/{session_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());
    assert_eq!(state.session_count().await, 0);
}

#[tokio::test]
async fn delete_unknown_session_returns_404() {
    let resp = app(AppState::default())
        .oneshot(empty("DELETE", "/sessions/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- tokens ---

#[tokio::test]
async fn token_for_unknown_session_returns_404() {
    let resp = app(AppState::default())
        .oneshot(json_request(
            "POST",
            "/sessions/nope/tokens",
            &json!({"type": "addPatient", "data": {"idTypes": ["pid"]}}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_token_type_returns_400() {
    let state = AppState::default();
    let session_id = session(&state).await;
    let resp = app(state)
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{session_id}/tokens"),
            &json!({"type": "deletePatient", "data": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- patients ---

#[tokio::test]
async fn read_patients_in_search_order() {
    let state = AppState::default();
    state.insert_patient("P1", &[("vorname", "Anna"), ("nachname", "Schmidt")]).await;
    state.insert_patient("P2", &[("vorname", "Bernd"), ("nachname", "Meier")]).await;

    let session_id = session(&state).await;
    let token_id = token(
        &state,
        &session_id,
        json!({"type": "readPatients", "data": {
            "searchIds": [{"idType": "pid", "idString": "P2"}, {"idType": "pid", "idString": "P1"}],
            "resultIds": ["pid"],
            "resultFields": ["vorname"],
        }}),
    )
    .await;

    let resp = app(state.clone())
        .oneshot(empty("GET", &format!("/patients?tokenId={token_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body[0]["ids"][0]["idString"], "P2");
    assert_eq!(body[0]["fields"], json!({"vorname": "Bernd"}));
    assert_eq!(body[1]["ids"][0]["idString"], "P1");

    // tokens are single use
    let resp = app(state)
        .oneshot(empty("GET", &format!("/patients?tokenId={token_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn add_patient_partial_match_returns_409_unless_sure() {
    let state = AppState::default();
    state.insert_patient("P1", &[("vorname", "Anna"), ("nachname", "Schmidt")]).await;

    let session_id = session(&state).await;
    let add = json!({"type": "addPatient", "data": {"idTypes": ["pid"]}});

    let token_id = token(&state, &session_id, add.clone()).await;
    let resp = app(state.clone())
        .oneshot(form_request(&format!("/patients?tokenId={token_id}"), "vorname=Anne&nachname=Schmidt"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["possibleMatches"], json!([{"idType": "pid", "idString": "P1"}]));

    let token_id = token(&state, &session_id, add).await;
    let resp = app(state.clone())
        .oneshot(form_request(
            &format!("/patients?tokenId={token_id}"),
            "vorname=Anne&nachname=Schmidt&sureness=true",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body[0]["idType"], "pid");
    assert_eq!(body[0]["tentative"], true);
    assert_eq!(state.patient_count().await, 2);
}

// --- full lifecycle ---

#[tokio::test]
async fn add_edit_read_lifecycle() {
    use tower::Service;

    let state = AppState::default();
    let mut app = app(state.clone()).into_service();

    // session
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(empty("POST", "/sessions"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let session_id = body_json(resp).await["sessionId"].as_str().unwrap().to_string();
    let tokens_uri = format!("/sessions/{session_id}/tokens");

    // add
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request("POST", &tokens_uri, &json!({"type": "addPatient", "data": {"idTypes": ["pid"]}})))
        .await
        .unwrap();
    let token_id = body_json(resp).await["id"].as_str().unwrap().to_string();
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(form_request(&format!("/patients?tokenId={token_id}"), "vorname=Clara&nachname=Zett"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    let pid = body[0]["idString"].as_str().unwrap().to_string();
    assert_eq!(body[0]["tentative"], false);

    // adding the same patient again finds it
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request("POST", &tokens_uri, &json!({"type": "addPatient", "data": {"idTypes": ["pid"]}})))
        .await
        .unwrap();
    let token_id = body_json(resp).await["id"].as_str().unwrap().to_string();
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(form_request(&format!("/patients?tokenId={token_id}"), "nachname=Zett&vorname=Clara"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(body_json(resp).await[0]["idString"], pid.as_str());

    // edit
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request(
            "POST",
            &tokens_uri,
            &json!({"type": "editPatient", "data": {"patientId": {"idType": "pid", "idString": pid}}}),
        ))
        .await
        .unwrap();
    let token_id = body_json(resp).await["id"].as_str().unwrap().to_string();
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(json_request("PUT", &format!("/patients/tokenId/{token_id}"), &json!({"nachname": "Zeta"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let patient = state.patient(&pid).await.unwrap();
    assert_eq!(patient.fields["nachname"], "Zeta");
    assert_eq!(patient.fields["vorname"], "Clara");

    // delete session
    let resp = ServiceExt::ready(&mut app)
        .await
        .unwrap()
        .call(empty("DELETE", &format!("/sessions/{session_id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(state.session_count().await, 0);
}
