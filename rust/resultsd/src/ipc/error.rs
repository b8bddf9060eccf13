use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_attached_when_given() {
        let resp = err(
            "7",
            "invalid_state_transition",
            "cannot approve while draft",
            Some(json!({ "attempted": "approve", "current": "draft" })),
        );
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["code"], "invalid_state_transition");
        assert_eq!(resp["error"]["details"]["attempted"], "approve");
    }

    #[test]
    fn plain_errors_have_no_details() {
        let resp = err("1", "bad_params", "missing key", None);
        assert!(resp["error"].get("details").is_none());
        assert_eq!(resp["id"], "1");
    }
}
