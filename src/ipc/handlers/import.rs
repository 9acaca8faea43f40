use std::path::Path;

use serde_json::json;
use tracing::{error, info, warn};

use crate::ipc::error::{err, err_store, ok};
use crate::ipc::types::{AppState, Request};
use crate::sheet::{self, Sheet};
use crate::store::{self, CandidateStudent};

const PREVIEW_ROWS: usize = 20;

fn load_sheet(req: &Request) -> Result<Sheet, serde_json::Value> {
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing path", None));
    };
    sheet::read_sheet(Path::new(path)).map_err(|e| {
        warn!("{}: sheet rejected: {e}", req.method);
        err(&req.id, e.code(), e.to_string(), None)
    })
}

/// Parse and validate the uploaded file without touching storage.
fn handle_preview(req: &Request) -> serde_json::Value {
    let sheet = match load_sheet(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let rows: Vec<serde_json::Value> = sheet
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|r| json!({ "row": r.row, "record": r.record }))
        .collect();
    ok(
        &req.id,
        json!({
            "headers": sheet.headers,
            "rowCount": sheet.rows.len(),
            "rows": rows,
            "skipped": sheet.skipped,
        }),
    )
}

/// Parse the uploaded file and merge its rows into the roster. The response
/// reports parse-level skips and constraint-level rejections together, each
/// against its 1-based data-row number in the file.
fn handle_apply(state: &AppState, req: &Request) -> serde_json::Value {
    let sheet = match load_sheet(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let conn = match state.connector.acquire() {
        Ok(c) => c,
        Err(e) => {
            error!("import.apply: {e}");
            return err_store(&req.id, &e);
        }
    };

    let batch: Vec<CandidateStudent> = sheet.rows.iter().map(|r| r.record.clone()).collect();
    match store::upsert_batch(&conn, &batch) {
        Ok(report) => {
            let upserted = report.upserted;
            let mut failures = sheet.skipped;
            for mut f in report.failures {
                f.row = sheet.rows[f.row - 1].row;
                failures.push(f);
            }
            failures.sort_by_key(|f| f.row);
            info!(upserted, failed = failures.len(), "import.apply");
            ok(&req.id, json!({ "upserted": upserted, "failures": failures }))
        }
        Err(e) => {
            error!("import.apply: {e}");
            err_store(&req.id, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.preview" => Some(handle_preview(req)),
        "import.apply" => Some(handle_apply(state, req)),
        _ => None,
    }
}
