use serde::{de::DeserializeOwned, Deserialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use super::RunnerError;

/// Request/response channel to a model runner. Requests are bare JSON objects,
/// every response is a JSON object terminated by a NUL byte.
pub struct RunnerLink<S> {
    stream: BufReader<S>,
    next_id: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: u64,
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: serde_json::Value,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RunnerLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_id: 0,
        }
    }

    /// Sends `request` with a fresh id and decodes the body of the matching response.
    pub async fn request<T: DeserializeOwned>(
        &mut self,
        mut request: serde_json::Map<String, serde_json::Value>,
    ) -> Result<T, RunnerError> {
        self.next_id += 1;
        let id = self.next_id;
        request.insert("id".into(), id.into());

        let encoded = serde_json::to_vec(&request)?;
        self.stream.get_mut().write_all(&encoded).await?;
        self.stream.get_mut().flush().await?;

        let mut raw = Vec::new();
        let read = self.stream.read_until(0, &mut raw).await?;
        if read == 0 {
            return Err(RunnerError::Closed);
        }
        if raw.last() == Some(&0) {
            raw.pop();
        }
        trace!(id, bytes = raw.len(), "Runner response");

        let envelope: Envelope = serde_json::from_slice(&raw)?;
        if envelope.id != id {
            return Err(RunnerError::IdMismatch(id, envelope.id));
        }
        if !envelope.success {
            return Err(RunnerError::Failed(
                envelope.error.unwrap_or_else(|| "no reason given".into()),
            ));
        }
        Ok(serde_json::from_value(envelope.body)?)
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::RunnerLink;
    use crate::impulse::RunnerError;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        pong: u32,
    }

    fn request(key: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert(key.into(), 1.into());
        m
    }

    /// Reads one request and answers with `reply(request)` plus the NUL terminator
    async fn answer(
        server: &mut DuplexStream,
        reply: impl FnOnce(serde_json::Value) -> String,
    ) -> serde_json::Value {
        let mut buf = vec![0u8; 4096];
        let n = server.read(&mut buf).await.unwrap();
        let req: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        let mut response = reply(req.clone()).into_bytes();
        response.push(0);
        server.write_all(&response).await.unwrap();
        req
    }

    #[tokio::test]
    async fn test_request_roundtrip_assigns_ids() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut link = RunnerLink::new(client);

        let server_task = tokio::spawn(async move {
            let first = answer(&mut server, |req| {
                format!(r#"{{"id":{},"success":true,"pong":7}}"#, req["id"])
            })
            .await;
            let second = answer(&mut server, |req| {
                format!(r#"{{"id":{},"success":true,"pong":8}}"#, req["id"])
            })
            .await;
            (first, second)
        });

        let first: Pong = link.request(request("ping")).await.unwrap();
        let second: Pong = link.request(request("ping")).await.unwrap();
        assert_eq!(first, Pong { pong: 7 });
        assert_eq!(second, Pong { pong: 8 });

        let (first, second) = server_task.await.unwrap();
        assert_eq!(first, serde_json::json!({"ping": 1, "id": 1}));
        assert_eq!(second["id"], 2);
    }

    #[tokio::test]
    async fn test_mismatched_id_rejected() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut link = RunnerLink::new(client);
        tokio::spawn(async move {
            answer(&mut server, |_| r#"{"id":42,"success":true,"pong":1}"#.into()).await;
        });
        let res = link.request::<Pong>(request("ping")).await;
        assert!(matches!(res, Err(RunnerError::IdMismatch(1, 42))));
    }

    #[tokio::test]
    async fn test_runner_failure_surfaces_reason() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut link = RunnerLink::new(client);
        tokio::spawn(async move {
            answer(&mut server, |_| {
                r#"{"id":1,"success":false,"error":"Invalid features"}"#.into()
            })
            .await;
        });
        let err = link.request::<Pong>(request("classify")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Model runner reported an error: Invalid features"
        );
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut link = RunnerLink::new(client);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await;
            drop(server);
        });
        let res = link.request::<Pong>(request("ping")).await;
        assert!(matches!(res, Err(RunnerError::Closed)));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut link = RunnerLink::new(client);
        tokio::spawn(async move {
            answer(&mut server, |_| "not json".into()).await;
        });
        let res = link.request::<Pong>(request("ping")).await;
        assert!(matches!(res, Err(RunnerError::InvalidResponse(_))));
    }
}
