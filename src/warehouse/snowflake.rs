use crate::config::ConnectionConfig;
use crate::error::{DeployError, Result};
use crate::warehouse::auth::KeyPairAuth;
use crate::warehouse::{build_insert_statement, SqlValue, WarehouseError, WarehouseSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bindings: Option<BTreeMap<String, Binding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<StatementParameters>,
}

#[derive(Debug, Serialize)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatementParameters {
    /// "0" 이면 요청 하나에 여러 구문 허용
    #[serde(rename = "MULTI_STATEMENT_COUNT")]
    multi_statement_count: String,
}

/// `202` 응답과 `422` 구문 오류의 본문
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementStatus {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
}

enum StatementState {
    Done,
    Running(String),
}

/// Snowflake SQL API v2 세션
///
/// 모든 구문은 키 페어 JWT 로 인증한 `POST /api/v2/statements` 요청입니다.
/// `202 Accepted` 로 돌아온 구문은 완료되거나 제한 시간이 지날 때까지 폴링합니다.
pub struct SnowflakeSession {
    client: reqwest::Client,
    base_url: String,
    auth: KeyPairAuth,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
    timeout_secs: u64,
    poll_interval: Duration,
    closed: bool,
}

impl SnowflakeSession {
    /// 키를 읽고 `SELECT 1` 로 인증 정보 확인
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let auth = KeyPairAuth::from_file(
            &config.private_key_path,
            &config.account,
            &config.user,
            config.private_key_passphrase.as_deref(),
        )?;
        debug!(fingerprint = auth.fingerprint(), "loaded private key");

        let mut session = Self::with_auth(config, auth)?;

        session.execute_single("SELECT 1").await.map_err(|e| match e {
            WarehouseError::Unauthorized(msg) => DeployError::Authentication(msg),
            WarehouseError::Token(msg) => DeployError::Credential(msg),
            other => DeployError::Connection(other.to_string()),
        })?;

        info!(
            base_url = %session.base_url,
            user = %config.user,
            database = %config.database,
            "connected to Snowflake"
        );
        Ok(session)
    }

    /// 서버 연결 없이 세션 생성
    pub fn with_auth(config: &ConnectionConfig, auth: KeyPairAuth) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("snowdeploy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeployError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            auth,
            database: Some(config.database.clone()).filter(|d| !d.is_empty()),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            timeout_secs: config.timeout_secs,
            poll_interval: DEFAULT_POLL_INTERVAL,
            closed: false,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn execute_single(&mut self, statement: &str) -> std::result::Result<(), WarehouseError> {
        self.submit(statement, None, false).await
    }

    async fn submit(
        &mut self,
        statement: &str,
        bindings: Option<BTreeMap<String, Binding>>,
        multi_statement: bool,
    ) -> std::result::Result<(), WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Closed);
        }

        let request = StatementRequest {
            statement,
            timeout: self.timeout_secs,
            database: self.database.as_deref(),
            schema: self.schema.as_deref(),
            warehouse: self.warehouse.as_deref(),
            role: self.role.as_deref(),
            bindings,
            parameters: multi_statement.then(|| StatementParameters {
                multi_statement_count: "0".to_string(),
            }),
        };

        debug!(bytes = statement.len(), multi_statement, "submitting statement");

        let token = self.auth.token()?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url, STATEMENTS_PATH))
            .bearer_auth(token)
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;

        match Self::classify(response).await? {
            StatementState::Done => Ok(()),
            StatementState::Running(handle) => self.wait_for(&handle).await,
        }
    }

    /// 비동기 구문이 끝날 때까지 폴링
    async fn wait_for(&mut self, handle: &str) -> std::result::Result<(), WarehouseError> {
        let deadline = Instant::now() + Duration::from_secs(self.timeout_secs);
        debug!(handle, "statement still running, polling");

        loop {
            if Instant::now() >= deadline {
                return Err(WarehouseError::Timeout {
                    handle: handle.to_string(),
                    secs: self.timeout_secs,
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let token = self.auth.token()?;
            let response = self
                .client
                .get(format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle))
                .bearer_auth(token)
                .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            if let StatementState::Done = Self::classify(response).await? {
                return Ok(());
            }
        }
    }

    async fn classify(
        response: reqwest::Response,
    ) -> std::result::Result<StatementState, WarehouseError> {
        let status = response.status().as_u16();
        if status == 200 {
            return Ok(StatementState::Done);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        match status {
            202 => {
                let parsed: Option<StatementStatus> = serde_json::from_str(&body).ok();
                match parsed.and_then(|s| s.statement_handle) {
                    Some(handle) => Ok(StatementState::Running(handle)),
                    None => Err(WarehouseError::Api { status, body }),
                }
            }
            401 | 403 => Err(WarehouseError::Unauthorized(body)),
            422 => match serde_json::from_str::<StatementStatus>(&body) {
                Ok(s) => Err(WarehouseError::Statement {
                    code: s.code.unwrap_or_default(),
                    sql_state: s.sql_state.unwrap_or_default(),
                    message: s.message.unwrap_or(body),
                }),
                Err(_) => Err(WarehouseError::Api { status, body }),
            },
            _ => Err(WarehouseError::Api { status, body }),
        }
    }
}

fn to_bindings(values: &[SqlValue]) -> BTreeMap<String, Binding> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            (
                (i + 1).to_string(),
                // 타임스탬프도 텍스트로 바인딩, 삽입 시 Snowflake 가 변환
                Binding {
                    kind: "TEXT",
                    value: value.as_text(),
                },
            )
        })
        .collect()
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn execute(&mut self, statement: &str) -> std::result::Result<(), WarehouseError> {
        self.submit(statement, None, true).await
    }

    async fn insert_row(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
    ) -> std::result::Result<(), WarehouseError> {
        let statement = build_insert_statement(table, columns);
        self.submit(&statement, Some(to_bindings(values)), false).await
    }

    async fn close(&mut self) -> std::result::Result<(), WarehouseError> {
        if !self.closed {
            self.closed = true;
            self.auth.clear();
            debug!("Snowflake session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::path::PathBuf;

    const KEY: &str = include_str!("../../tests/fixtures/test_key.p8");

    fn test_config(url: &str) -> ConnectionConfig {
        ConnectionConfig {
            account: "acct".to_string(),
            user: "deployer".to_string(),
            database: "DB".to_string(),
            warehouse: Some("WH".to_string()),
            role: Some("DEPLOYER".to_string()),
            account_url: Some(url.to_string()),
            private_key_path: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/tests/fixtures/test_key.p8"
            )),
            ..ConnectionConfig::default()
        }
    }

    fn session(url: &str) -> SnowflakeSession {
        let config = test_config(url);
        let auth = KeyPairAuth::from_pem(KEY, &config.account, &config.user, None).unwrap();
        SnowflakeSession::with_auth(&config, auth)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", STATEMENTS_PATH)
            .match_header("authorization", Matcher::Regex("^Bearer .+".to_string()))
            .match_header("x-snowflake-authorization-token-type", "KEYPAIR_JWT")
            .match_body(Matcher::PartialJson(json!({
                "statement": "CREATE TABLE t (id INT); INSERT INTO t VALUES (1);",
                "database": "DB",
                "warehouse": "WH",
                "role": "DEPLOYER",
                "parameters": { "MULTI_STATEMENT_COUNT": "0" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"statementHandle":"01a","message":"Statement executed successfully."}"#)
            .create_async()
            .await;

        let mut session = session(&server.url());
        session
            .execute("CREATE TABLE t (id INT); INSERT INTO t VALUES (1);")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_statement_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STATEMENTS_PATH)
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"002003","sqlState":"02000","message":"SQL compilation error: Table 'MISSING' does not exist","statementHandle":"01b"}"#,
            )
            .create_async()
            .await;

        let mut session = session(&server.url());
        let err = session.execute("SELECT * FROM MISSING").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "002003 (02000): SQL compilation error: Table 'MISSING' does not exist"
        );
    }

    #[tokio::test]
    async fn test_execute_polls_running_statement() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STATEMENTS_PATH)
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":"333334","message":"Asynchronous execution in progress.","statementHandle":"01c","statementStatusUrl":"/api/v2/statements/01c"}"#,
            )
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/api/v2/statements/01c")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut session = session(&server.url());
        session.execute("CALL long_running()").await.unwrap();

        poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STATEMENTS_PATH)
            .with_status(401)
            .with_body(r#"{"code":"390144","message":"JWT token is invalid."}"#)
            .create_async()
            .await;

        let mut session = session(&server.url());
        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_insert_row_binds_values() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", STATEMENTS_PATH)
            .match_body(Matcher::PartialJson(json!({
                "statement": "INSERT INTO DB.PUBLIC.H (FILENAME, ERROR_MESSAGE) VALUES (?, ?)",
                "bindings": {
                    "1": { "type": "TEXT", "value": "V1__init.sql'); DROP TABLE x; --" },
                    "2": { "type": "TEXT", "value": null }
                }
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut session = session(&server.url());
        session
            .insert_row(
                "DB.PUBLIC.H",
                &["FILENAME", "ERROR_MESSAGE"],
                &[
                    SqlValue::from("V1__init.sql'); DROP TABLE x; --"),
                    SqlValue::Null,
                ],
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_rejected_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STATEMENTS_PATH)
            .with_status(401)
            .with_body(r#"{"code":"390144","message":"JWT token is invalid."}"#)
            .create_async()
            .await;

        let result = SnowflakeSession::connect(&test_config(&server.url())).await;
        assert!(matches!(result, Err(DeployError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_connect_probes_with_select() {
        let mut server = mockito::Server::new_async().await;
        let probe = server
            .mock("POST", STATEMENTS_PATH)
            .match_body(Matcher::PartialJson(json!({ "statement": "SELECT 1" })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let result = SnowflakeSession::connect(&test_config(&server.url())).await;
        assert!(result.is_ok());
        probe.assert_async().await;
    }

    #[tokio::test]
    async fn test_closed_session_refuses_statements() {
        let server = mockito::Server::new_async().await;
        let mut session = session(&server.url());

        session.close().await.unwrap();
        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Closed));
    }
}
