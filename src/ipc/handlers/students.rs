use serde_json::json;
use tracing::{error, info};

use crate::ipc::error::{err, err_store, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, CandidateStudent};

fn candidate_from_params(params: &serde_json::Value) -> Result<CandidateStudent, String> {
    let text = |key: &str| -> Result<String, String> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing {key}"))
    };

    let name = text("name")?;
    let email = text("email")?;
    let phone_number = text("phoneNumber")?;
    let age = params
        .get("age")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "missing age".to_string())?;
    let class_label = params
        .get("classLabel")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(CandidateStudent {
        name,
        age,
        class_label,
        email,
        phone_number,
    })
}

fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match state.connector.acquire() {
        Ok(c) => c,
        Err(e) => {
            error!("students.list: {e}");
            return err_store(&req.id, &e);
        }
    };
    match store::fetch_all(&conn) {
        Ok(students) => {
            info!(count = students.len(), "students.list");
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => {
            error!("students.list: {e}");
            err_store(&req.id, &e)
        }
    }
}

fn handle_update(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(id) = req.params.get("id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let fields = match candidate_from_params(&req.params) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let conn = match state.connector.acquire() {
        Ok(c) => c,
        Err(e) => {
            error!("students.update: {e}");
            return err_store(&req.id, &e);
        }
    };
    match store::update_record(&conn, id, &fields) {
        Ok(()) => {
            info!(id, "students.update");
            ok(&req.id, json!({ "updated": true }))
        }
        Err(e) => {
            error!("students.update id={id}: {e}");
            err_store(&req.id, &e)
        }
    }
}

fn handle_delete(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(id) = req.params.get("id").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let conn = match state.connector.acquire() {
        Ok(c) => c,
        Err(e) => {
            error!("students.delete: {e}");
            return err_store(&req.id, &e);
        }
    };
    match store::delete_record(&conn, id) {
        Ok(()) => {
            info!(id, "students.delete");
            ok(&req.id, json!({ "deleted": true }))
        }
        Err(e) => {
            error!("students.delete id={id}: {e}");
            err_store(&req.id, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
