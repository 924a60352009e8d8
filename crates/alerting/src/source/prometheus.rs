use aimon_common::LabelSet;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{QueryError, Sample, Series, SignalSource};

/// Reads signals from a Prometheus-compatible HTTP query API.
pub struct PrometheusSource {
    base_url: String,
    client: Client,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<ApiData, QueryError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(params)
            .send()
            .await
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;

        if status.is_server_error() {
            return Err(QueryError::Unreachable(format!("HTTP {status}")));
        }
        decode_body(&body)
    }
}

#[async_trait::async_trait]
impl SignalSource for PrometheusSource {
    async fn query(&self, expr: &str, at_ms: i64) -> Result<Vec<Sample>, QueryError> {
        let params = [("query", expr.to_string()), ("time", unix_secs(at_ms))];
        match self.get("/api/v1/query", &params).await? {
            ApiData::Vector(items) => {
                let mut out = items
                    .into_iter()
                    .map(|item| -> Result<Sample, QueryError> {
                        Ok(Sample {
                            labels: strip_name(item.metric),
                            value: parse_value(&item.value.1)?,
                        })
                    })
                    .collect::<Result<Vec<_>, QueryError>>()?;
                out.sort_by(|a, b| a.labels.cmp(&b.labels));
                Ok(out)
            }
            ApiData::Scalar((_, raw)) => Ok(vec![Sample {
                labels: LabelSet::new(),
                value: parse_value(&raw)?,
            }]),
            ApiData::Matrix(_) => Err(QueryError::InvalidExpression(
                "instant query returned a range vector".into(),
            )),
        }
    }

    async fn query_range(
        &self,
        expr: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Result<Vec<Series>, QueryError> {
        let params = [
            ("query", expr.to_string()),
            ("start", unix_secs(start_ms)),
            ("end", unix_secs(end_ms)),
            ("step", format!("{}", step_ms as f64 / 1000.0)),
        ];
        match self.get("/api/v1/query_range", &params).await? {
            ApiData::Matrix(items) => items
                .into_iter()
                .map(|item| -> Result<Series, QueryError> {
                    let points = item
                        .values
                        .iter()
                        .map(|(ts, raw)| -> Result<(i64, f64), QueryError> {
                            Ok(((ts * 1000.0).round() as i64, parse_value(raw)?))
                        })
                        .collect::<Result<Vec<_>, QueryError>>()?;
                    Ok(Series {
                        labels: strip_name(item.metric),
                        points,
                    })
                })
                .collect(),
            _ => Err(QueryError::BadResponse("range query did not return a matrix".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    data: Option<ApiData>,
    error: Option<String>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<VectorItem>),
    Matrix(Vec<MatrixItem>),
    Scalar((f64, String)),
}

#[derive(Debug, Deserialize)]
struct VectorItem {
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixItem {
    metric: BTreeMap<String, String>,
    values: Vec<(f64, String)>,
}

fn decode_body(body: &str) -> Result<ApiData, QueryError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| QueryError::BadResponse(e.to_string()))?;
    if resp.status != "success" {
        let kind = resp.error_type.unwrap_or_else(|| "error".into());
        let msg = resp.error.unwrap_or_default();
        return Err(QueryError::InvalidExpression(format!("{kind}: {msg}")));
    }
    resp.data
        .ok_or_else(|| QueryError::BadResponse("missing data".into()))
}

fn strip_name(mut metric: BTreeMap<String, String>) -> LabelSet {
    metric.remove("__name__");
    LabelSet::from(metric)
}

fn parse_value(raw: &str) -> Result<f64, QueryError> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse()
            .map_err(|_| QueryError::BadResponse(format!("bad sample value {raw:?}"))),
    }
}

fn unix_secs(ms: i64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"__name__":"up","instance":"h1"},"value":[1700000000.5,"1"]}
        ]}}"#;
        match decode_body(body).unwrap() {
            ApiData::Vector(items) => {
                assert_eq!(items.len(), 1);
                let labels = strip_name(items[0].metric.clone());
                assert_eq!(labels.get("instance"), Some("h1"));
                assert!(!labels.contains("__name__"));
                assert_eq!(parse_value(&items[0].value.1).unwrap(), 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_matrix() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"job":"api"},"values":[[1.0,"2"],[2.0,"3"]]}
        ]}}"#;
        match decode_body(body).unwrap() {
            ApiData::Matrix(items) => assert_eq!(items[0].values.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_status_is_invalid_expression() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 4"}"#;
        let err = decode_body(body).unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpression(ref m) if m.contains("bad_data")));
    }

    #[test]
    fn garbage_is_bad_response() {
        assert!(matches!(decode_body("<html>"), Err(QueryError::BadResponse(_))));
    }

    #[test]
    fn special_values() {
        assert!(parse_value("NaN").unwrap().is_nan());
        assert_eq!(parse_value("+Inf").unwrap(), f64::INFINITY);
        assert!(parse_value("abc").is_err());
    }

    #[test]
    fn time_param_is_seconds() {
        assert_eq!(unix_secs(1_700_000_000_500), "1700000000.500");
    }

    #[tokio::test]
    async fn unreachable_host_is_reported() {
        let src = PrometheusSource::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let err = src.query("up", 0).await.unwrap_err();
        assert!(matches!(err, QueryError::Unreachable(_)));
    }
}
