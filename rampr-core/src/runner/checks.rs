use crate::http::HttpResponse;

/// A pure pass/fail predicate over a response. Checks never abort the
/// iteration they run in; failures are recorded and the remaining steps
/// still execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Status equals the given code exactly.
    StatusIs { name: String, status: u16 },
    /// Status is in `[300*class/100, ...)`, e.g. class 2 accepts 200..=299.
    StatusClass { name: String, class: u16 },
    /// JSON body has the given top-level field.
    BodyHasField { name: String, field: String },
    /// JSON body field equals the given string.
    BodyFieldEquals {
        name: String,
        field: String,
        value: String,
    },
    /// JSON body field is an array.
    BodyFieldIsArray { name: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
}

impl Check {
    pub fn name(&self) -> &str {
        match self {
            Self::StatusIs { name, .. }
            | Self::StatusClass { name, .. }
            | Self::BodyHasField { name, .. }
            | Self::BodyFieldEquals { name, .. }
            | Self::BodyFieldIsArray { name, .. } => name,
        }
    }

    /// A transport failure surfaces as status 0 with an empty body and fails
    /// every predicate, including status-class ones.
    pub fn evaluate(&self, response: &HttpResponse) -> CheckOutcome {
        let passed = match self {
            Self::StatusIs { status, .. } => response.status == *status,
            Self::StatusClass { class, .. } => {
                response.status >= class * 100 && response.status < (class + 1) * 100
            }
            Self::BodyHasField { field, .. } => body_field(response, field).is_some(),
            Self::BodyFieldEquals { field, value, .. } => body_field(response, field)
                .and_then(|v| v.as_str().map(|s| s == value))
                .unwrap_or(false),
            Self::BodyFieldIsArray { field, .. } => body_field(response, field)
                .map(|v| v.is_array())
                .unwrap_or(false),
        };

        CheckOutcome {
            name: self.name().to_string(),
            passed,
        }
    }
}

fn body_field(response: &HttpResponse, field: &str) -> Option<serde_json::Value> {
    let parsed: serde_json::Value = serde_json::from_slice(&response.body).ok()?;
    parsed.get(field).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn check_passes(check: &Check, res: &HttpResponse) -> bool {
        check.evaluate(res).passed
    }

    #[test]
    fn status_is_matches_exactly() {
        let check = Check::StatusIs {
            name: "status is 200".to_string(),
            status: 200,
        };
        assert!(check_passes(&check, &response(200, "")));
        assert!(!check_passes(&check, &response(204, "")));
        assert!(!check_passes(&check, &response(0, "")));
    }

    #[test]
    fn status_class_accepts_the_whole_class() {
        let check = Check::StatusClass {
            name: "status is 2xx".to_string(),
            class: 2,
        };
        assert!(check_passes(&check, &response(200, "")));
        assert!(check_passes(&check, &response(299, "")));
        assert!(!check_passes(&check, &response(301, "")));
        assert!(!check_passes(&check, &response(0, "")));
    }

    #[test]
    fn body_field_presence_and_equality() {
        let res = response(200, r#"{"service":"sample-app","status":"healthy"}"#);

        let has = Check::BodyHasField {
            name: "response has service".to_string(),
            field: "service".to_string(),
        };
        assert!(check_passes(&has, &res));

        let missing = Check::BodyHasField {
            name: "response has users".to_string(),
            field: "users".to_string(),
        };
        assert!(!check_passes(&missing, &res));

        let eq = Check::BodyFieldEquals {
            name: "health status is healthy".to_string(),
            field: "status".to_string(),
            value: "healthy".to_string(),
        };
        assert!(check_passes(&eq, &res));

        let neq = Check::BodyFieldEquals {
            name: "health status is healthy".to_string(),
            field: "status".to_string(),
            value: "degraded".to_string(),
        };
        assert!(!check_passes(&neq, &res));
    }

    #[test]
    fn body_field_is_array() {
        let check = Check::BodyFieldIsArray {
            name: "api has users array".to_string(),
            field: "users".to_string(),
        };
        assert!(check_passes(&check, &response(200, r#"{"users":[1,2]}"#)));
        assert!(!check_passes(&check, &response(200, r#"{"users":"none"}"#)));
        assert!(!check_passes(&check, &response(200, "not json")));
    }
}
