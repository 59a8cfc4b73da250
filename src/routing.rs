//! Application router configuration.

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::{
    AppState, account, customize, dashboard, endpoints, import, logging::logging_middleware,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::USERS, post(account::register_user))
        .route(endpoints::LOG_IN, post(account::log_in))
        .route(endpoints::PASSWORD, post(account::change_password))
        .route(endpoints::USER, delete(account::delete_user))
        .route(endpoints::IMPORT, post(import::import_statement))
        .route(endpoints::TRANSACTIONS, get(import::get_transactions))
        .route(
            endpoints::TRANSACTION_EDITS,
            post(customize::apply_transaction_edits),
        )
        .route(
            endpoints::CATEGORIES,
            get(customize::get_categories).post(customize::create_category),
        )
        .route(
            endpoints::SPENDING_DASHBOARD,
            get(dashboard::get_spending_dashboard),
        )
        .route(
            endpoints::INCOME_DASHBOARD,
            get(dashboard::get_income_dashboard),
        )
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod routing_tests {
    use std::sync::Arc;

    use axum::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde_json::{Value, json};

    use crate::{AppConfig, AppState, MemoryBlobStore, build_router, endpoints};

    const PASSWORD: &str = "asomewhatlongpassword1";

    const STATEMENT_CSV: &str = "\
        Type,Product,Started Date,Completed Date,Description,Amount,Fee,Currency,State,Balance\n\
        CARD_PAYMENT,Current,2024-01-05 14:33:20,2024-01-05 14:35:00,Spotify,-1490,0,HUF,COMPLETED,50000\n\
        CARD_PAYMENT,Current,2024-01-07 09:12:00,2024-01-07 09:12:10,Tesco,-8250,0,HUF,COMPLETED,41750\n\
        TRANSFER,Current,2024-01-08 10:00:00,2024-01-08 10:00:05,To Savings Account,-10000,0,HUF,COMPLETED,31750\n\
        INTEREST,Savings,2024-01-09 00:00:00,2024-01-09 00:00:00,Gross interest,15,0,HUF,COMPLETED,10015\n\
        TOPUP,Current,2024-01-15 08:00:00,2024-01-15 08:00:02,Salary,450000,0,HUF,COMPLETED,481750";

    fn test_server() -> TestServer {
        let state = AppState::new(Arc::new(MemoryBlobStore::new()), AppConfig::default());

        TestServer::new(build_router(state))
    }

    fn basic_auth(username: &str, password: &str) -> HeaderValue {
        let encoded = BASE64.encode(format!("{username}:{password}"));

        HeaderValue::from_str(&format!("Basic {encoded}")).expect("header value is valid ASCII")
    }

    fn statement_form() -> MultipartForm {
        MultipartForm::new().add_part(
            "file",
            Part::bytes(STATEMENT_CSV.as_bytes().to_vec())
                .file_name("statement.csv")
                .mime_type("text/csv"),
        )
    }

    async fn register(server: &TestServer, username: &str) {
        server
            .post(endpoints::USERS)
            .json(&json!({ "username": username, "password": PASSWORD }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    async fn import_statement(server: &TestServer, username: &str, password: &str) -> Value {
        let response = server
            .post(endpoints::IMPORT)
            .add_header(AUTHORIZATION, basic_auth(username, password))
            .multipart(statement_form())
            .await;

        response.assert_status_ok();
        response.json::<Value>()
    }

    #[tokio::test]
    async fn register_then_log_in() {
        let server = test_server();

        register(&server, "alice").await;

        server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": PASSWORD }))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn log_in_with_wrong_password_is_unauthorized() {
        let server = test_server();
        register(&server, "alice").await;

        server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": "wrongpassword1" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let server = test_server();
        register(&server, "alice").await;

        server
            .post(endpoints::USERS)
            .json(&json!({ "username": "alice", "password": PASSWORD }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn import_merges_and_re_import_adds_nothing() {
        let server = test_server();
        register(&server, "alice").await;

        let first = import_statement(&server, "alice", PASSWORD).await;
        assert_eq!(first["new_rows"], 4);
        assert_eq!(first["total_rows"], 4);
        assert_eq!(first["currency"], "HUF");
        assert_eq!(first["persisted"], true);

        let second = import_statement(&server, "alice", PASSWORD).await;
        assert_eq!(second["new_rows"], 0);
        assert_eq!(second["total_rows"], 4);
    }

    #[tokio::test]
    async fn guest_import_is_parsed_but_not_persisted() {
        let server = test_server();

        let response = server
            .post(endpoints::IMPORT)
            .multipart(statement_form())
            .await;

        response.assert_status_ok();
        let summary = response.json::<Value>();

        assert_eq!(summary["persisted"], false);
        assert_eq!(summary["new_rows"], 4);
        assert_eq!(summary["transactions"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn transactions_require_credentials() {
        let server = test_server();

        server
            .get(endpoints::TRANSACTIONS)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn listed_transactions_match_the_import() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;

        let response = server
            .get(endpoints::TRANSACTIONS)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        let transactions = body["transactions"].as_array().unwrap();

        assert_eq!(transactions.len(), 4);
        assert_eq!(transactions[0]["Description"], "Spotify");
        assert_eq!(transactions[0]["Category"], "Uncategorized");
        // The savings transfer is hidden but present.
        assert_eq!(transactions[2]["Hide"], true);
    }

    #[tokio::test]
    async fn category_edits_teach_the_categorizer() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;
        let auth = basic_auth("alice", PASSWORD);

        server
            .post(endpoints::CATEGORIES)
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({ "name": "Music" }))
            .await
            .assert_status_ok();

        let response = server
            .post(endpoints::TRANSACTION_EDITS)
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({
                "edits": [{
                    "date": "2024-01-05",
                    "description": "Spotify",
                    "balance": 50000,
                    "category": "Music"
                }]
            }))
            .await;

        response.assert_status_ok();
        let summary = response.json::<Value>();
        assert_eq!(summary["applied"], 1);
        assert_eq!(summary["keywords_added"], 1);
        assert_eq!(summary["missing"], 0);

        // The keyword is persisted...
        let categories = server
            .get(endpoints::CATEGORIES)
            .add_header(AUTHORIZATION, auth.clone())
            .await
            .json::<Value>();
        assert_eq!(categories["Music"], json!(["spotify"]));

        // ...and a re-upload does not undo the assignment.
        import_statement(&server, "alice", PASSWORD).await;

        let body = server
            .get(endpoints::TRANSACTIONS)
            .add_header(AUTHORIZATION, auth)
            .await
            .json::<Value>();
        assert_eq!(body["transactions"][0]["Category"], "Music");
    }

    #[tokio::test]
    async fn edits_against_unknown_categories_are_rejected() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;

        server
            .post(endpoints::TRANSACTION_EDITS)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .json(&json!({
                "edits": [{
                    "date": "2024-01-05",
                    "description": "Spotify",
                    "balance": 50000,
                    "category": "Nonexistent"
                }]
            }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn spending_dashboard_aggregates_visible_spending() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;

        let response = server
            .get(endpoints::SPENDING_DASHBOARD)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .await;

        response.assert_status_ok();
        let dashboard = response.json::<Value>();

        // Spotify + Tesco; the hidden savings transfer does not count.
        assert_eq!(dashboard["total"], 9740.0);
        assert_eq!(dashboard["total_formatted"], "9,740 Ft");
        assert_eq!(dashboard["monthly"]["labels"], json!(["January 2024"]));
        assert_eq!(dashboard["monthly"]["values"], json!([9740.0]));
        assert_eq!(dashboard["by_category"][0]["category"], "Uncategorized");
    }

    #[tokio::test]
    async fn income_dashboard_aggregates_current_account_income() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;

        let response = server
            .get(endpoints::INCOME_DASHBOARD)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .await;

        response.assert_status_ok();
        let dashboard = response.json::<Value>();

        assert_eq!(dashboard["total"], 450000.0);
        assert_eq!(dashboard["monthly"]["values"], json!([450000.0]));
    }

    #[tokio::test]
    async fn changing_the_password_keeps_the_data_readable() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;
        let new_password = "anevenlongerpassword22";

        server
            .post(endpoints::PASSWORD)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .json(&json!({
                "old_password": PASSWORD,
                "new_password": new_password
            }))
            .await
            .assert_status_ok();

        // The old credentials no longer work...
        server
            .get(endpoints::TRANSACTIONS)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        // ...and the new ones see the same ledger.
        let body = server
            .get(endpoints::TRANSACTIONS)
            .add_header(AUTHORIZATION, basic_auth("alice", new_password))
            .await
            .json::<Value>();
        assert_eq!(body["transactions"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn deleting_the_account_removes_access_and_data() {
        let server = test_server();
        register(&server, "alice").await;
        import_statement(&server, "alice", PASSWORD).await;

        server
            .delete(endpoints::USER)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .await
            .assert_status_ok();

        server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": PASSWORD }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn users_cannot_read_each_others_transactions() {
        let server = test_server();
        register(&server, "alice").await;
        register(&server, "bob").await;
        import_statement(&server, "alice", PASSWORD).await;

        let body = server
            .get(endpoints::TRANSACTIONS)
            .add_header(AUTHORIZATION, basic_auth("bob", PASSWORD))
            .await
            .json::<Value>();

        // Bob sees his own (empty) ledger, never Alice's.
        assert_eq!(body["transactions"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn non_csv_uploads_are_rejected() {
        let server = test_server();
        register(&server, "alice").await;

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"not a csv".to_vec())
                .file_name("statement.pdf")
                .mime_type("application/pdf"),
        );

        server
            .post(endpoints::IMPORT)
            .add_header(AUTHORIZATION, basic_auth("alice", PASSWORD))
            .multipart(form)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
