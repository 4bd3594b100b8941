use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use lfs_types::{Direction, Oid};
use serde::{Deserialize, Serialize};

/// Name of the plain HTTP transfer adapter every server supports.
pub const BASIC_ADAPTER: &str = "basic";

/// Media type of batch requests and responses.
pub const MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// An `{oid, size}` pair as sent in a batch request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub oid: Oid,
    pub size: u64,
}

/// Body of a batch negotiation call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operation: Direction,
    pub objects: Vec<ObjectSpec>,
    /// Adapter names the client can drive, in preference order. Omitted
    /// when the client only speaks `basic`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfers: Vec<String>,
}

impl BatchRequest {
    pub fn new(operation: Direction, objects: Vec<ObjectSpec>, transfers: Vec<String>) -> Self {
        let transfers = if transfers.len() == 1 && transfers[0] == BASIC_ADAPTER {
            Vec::new()
        } else {
            transfers
        };
        Self {
            operation,
            objects,
            transfers,
        }
    }
}

/// Server answer to a batch call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Adapter chosen by the server. Absent or empty means `basic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<String>,
    #[serde(default)]
    pub objects: Vec<NegotiatedObject>,
}

impl BatchResponse {
    pub fn adapter_name(&self) -> &str {
        match self.transfer.as_deref() {
            None | Some("") => BASIC_ADAPTER,
            Some(name) => name,
        }
    }

    /// Turn relative `expires_in` values into absolute deadlines measured
    /// from `received`. A deadline past the representable range means the
    /// action never expires.
    pub fn resolve_expiry(&mut self, received: DateTime<Utc>) {
        for action in self.objects.iter_mut().flat_map(|o| o.actions.values_mut()) {
            if action.expires_at.is_none() {
                if let Some(secs) = action.expires_in {
                    action.expires_at = Duration::try_seconds(secs)
                        .and_then(|delta| received.checked_add_signed(delta));
                }
            }
        }
    }
}

/// Per-object negotiation result.
///
/// Exactly one of three shapes: an `error`, a set of `actions` naming the
/// transfer to perform, or neither (nothing to do).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedObject {
    pub oid: Oid,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub actions: HashMap<String, Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl NegotiatedObject {
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// The action that moves bytes in `direction`, if any.
    pub fn transfer_action(&self, direction: Direction) -> Option<&Action> {
        self.action(direction.as_str())
    }
}

/// Authorization to perform one transfer step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub href: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl Action {
    /// `true` if the deadline has passed at `now`. Deadlines at or before
    /// the Unix epoch are the server's way of saying "never".
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) if at.timestamp() > 0 => at <= now,
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Server-side rejection of a single object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn oid() -> Oid {
        Oid::digest(b"object")
    }

    #[test]
    fn basic_only_transfers_are_omitted() {
        let req = BatchRequest::new(Direction::Upload, vec![], vec!["basic".into()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"operation": "upload", "objects": []}));
    }

    #[test]
    fn other_transfers_are_sent() {
        let req = BatchRequest::new(
            Direction::Download,
            vec![ObjectSpec { oid: oid(), size: 3 }],
            vec!["tus".into(), "basic".into()],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["transfers"], serde_json::json!(["tus", "basic"]));
        assert_eq!(json["objects"][0]["oid"], oid().to_hex());
        assert_eq!(json["objects"][0]["size"], 3);
    }

    #[test]
    fn empty_transfer_name_means_basic() {
        let resp: BatchResponse =
            serde_json::from_str(r#"{"transfer":"","objects":[]}"#).unwrap();
        assert_eq!(resp.adapter_name(), "basic");
        let resp: BatchResponse = serde_json::from_str(r#"{"objects":[]}"#).unwrap();
        assert_eq!(resp.adapter_name(), "basic");
        let resp: BatchResponse = serde_json::from_str(r#"{"transfer":"tus"}"#).unwrap();
        assert_eq!(resp.adapter_name(), "tus");
    }

    #[test]
    fn parses_full_object() {
        let json = format!(
            r#"{{"objects":[{{
                "oid":"{}","size":6,"authenticated":true,
                "actions":{{"download":{{
                    "href":"https://example.com/o",
                    "header":{{"Authorization":"Basic xyz"}},
                    "expires_at":"2030-01-01T00:00:00Z"
                }}}}
            }}]}}"#,
            oid()
        );
        let resp: BatchResponse = serde_json::from_str(&json).unwrap();
        let obj = &resp.objects[0];
        assert!(obj.authenticated);
        let action = obj.transfer_action(Direction::Download).unwrap();
        assert_eq!(action.header["Authorization"], "Basic xyz");
        assert!(obj.transfer_action(Direction::Upload).is_none());
        assert!(!action.is_expired_at(Utc.with_ymd_and_hms(2029, 1, 1, 0, 0, 0).unwrap()));
        assert!(action.is_expired_at(Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn parses_object_error() {
        let json = format!(
            r#"{{"objects":[{{"oid":"{}","size":1,"error":{{"code":404,"message":"Object does not exist"}}}}]}}"#,
            oid()
        );
        let resp: BatchResponse = serde_json::from_str(&json).unwrap();
        let err = resp.objects[0].error.as_ref().unwrap();
        assert_eq!(err.code, 404);
        assert_eq!(err.to_string(), "[404] Object does not exist");
    }

    #[test]
    fn zero_deadline_never_expires() {
        let action = Action {
            href: "x".into(),
            expires_at: Some(Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!action.is_expired());
    }

    #[test]
    fn expires_in_is_resolved_against_receive_time() {
        let mut resp = BatchResponse {
            transfer: None,
            objects: vec![NegotiatedObject {
                oid: oid(),
                size: 1,
                authenticated: false,
                actions: HashMap::from([(
                    "download".to_string(),
                    Action {
                        href: "x".into(),
                        expires_in: Some(60),
                        ..Default::default()
                    },
                )]),
                error: None,
            }],
        };
        let received = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        resp.resolve_expiry(received);
        let action = resp.objects[0].action("download").unwrap();
        assert_eq!(action.expires_at, Some(received + Duration::seconds(60)));
        assert!(!action.is_expired_at(received + Duration::seconds(59)));
        assert!(action.is_expired_at(received + Duration::seconds(60)));
    }

    #[test]
    fn out_of_range_expires_in_never_expires() {
        let mut resp = BatchResponse {
            transfer: None,
            objects: vec![NegotiatedObject {
                oid: oid(),
                size: 1,
                authenticated: false,
                actions: HashMap::from([
                    (
                        "download".to_string(),
                        Action {
                            href: "x".into(),
                            expires_in: Some(100_000_000_000_000),
                            ..Default::default()
                        },
                    ),
                    (
                        "verify".to_string(),
                        Action {
                            href: "y".into(),
                            expires_in: Some(i64::MIN),
                            ..Default::default()
                        },
                    ),
                ]),
                error: None,
            }],
        };
        resp.resolve_expiry(Utc::now());
        for name in ["download", "verify"] {
            let action = resp.objects[0].action(name).unwrap();
            assert_eq!(action.expires_at, None, "{name}");
            assert!(!action.is_expired());
        }
    }
}
