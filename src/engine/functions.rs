//! Extra SQL functions available to user queries.
//!
//! - `startsWith(whole, prefix)`
//! - `jsonSubtree(path, json)`: the subtree at a `/`-separated path, as JSON text
//! - `jsonLeaf(path, json [, nullOnNonScalar])`: the scalar at the path, as text
//! - `jsonLeaves(pathToArray, leafPointer, json [, nullOnNonArray])`: for each
//!   element of the array at the path, the text at the JSON pointer, as a JSON array

use anyhow::{Context as _, Result, bail};
use rusqlite::{
    Connection,
    functions::{Context, FunctionFlags},
};
use serde_json::Value;

fn user_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(err.into())
}

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("startsWith", 2, flags, |ctx| {
        let whole: Option<String> = ctx.get(0)?;
        let prefix: Option<String> = ctx.get(1)?;
        Ok(match (whole, prefix) {
            (Some(whole), Some(prefix)) => Some(whole.starts_with(&prefix)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("jsonSubtree", 2, flags, |ctx| {
        let (Some(path), Some(json)) = (text_arg(ctx, 0)?, text_arg(ctx, 1)?) else {
            return Ok(None);
        };
        let subtree = json_subtree(&path, &json).map_err(user_error)?;
        Ok(subtree.map(|value| value.to_string()))
    })?;

    for arity in [2, 3] {
        conn.create_scalar_function("jsonLeaf", arity, flags, |ctx| {
            let (Some(path), Some(json)) = (text_arg(ctx, 0)?, text_arg(ctx, 1)?) else {
                return Ok(None);
            };
            let null_on_non_scalar = flag_arg(ctx, 2)?;
            json_leaf(&path, &json, null_on_non_scalar).map_err(user_error)
        })?;
    }

    for arity in [3, 4] {
        conn.create_scalar_function("jsonLeaves", arity, flags, |ctx| {
            let (Some(path), Some(pointer), Some(json)) =
                (text_arg(ctx, 0)?, text_arg(ctx, 1)?, text_arg(ctx, 2)?)
            else {
                return Ok(None);
            };
            let null_on_non_array = flag_arg(ctx, 3)?;
            json_leaves(&path, &pointer, &json, null_on_non_array).map_err(user_error)
        })?;
    }
    Ok(())
}

fn text_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    ctx.get(idx)
}

fn flag_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<bool> {
    if idx >= ctx.len() {
        return Ok(false);
    }
    Ok(ctx.get::<Option<bool>>(idx)?.unwrap_or(false))
}

/// Follows object keys along a `/`-separated path. Arrays are not navigated.
pub fn json_subtree(path: &str, json: &str) -> Result<Option<Value>> {
    let mut tree: Value = serde_json::from_str(json).with_context(|| {
        format!(
            "Failed parsing the JSON (truncated to 100): {}",
            json.chars().take(100).collect::<String>()
        )
    })?;
    for step in path.split('/').filter(|step| !step.is_empty()) {
        match tree {
            Value::Object(mut map) => match map.remove(step) {
                Some(next) => tree = next,
                None => return Ok(None),
            },
            _ => return Ok(None),
        }
    }
    Ok(Some(tree))
}

pub fn json_leaf(path: &str, json: &str, null_on_non_scalar: bool) -> Result<Option<String>> {
    let Some(tree) = json_subtree(path, json)? else {
        return Ok(None);
    };
    match tree {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Bool(_) | Value::Number(_) => Ok(Some(tree.to_string())),
        _ if null_on_non_scalar => Ok(None),
        other => bail!(
            "The node at {path} is not a scalar value, but {}",
            node_kind(&other)
        ),
    }
}

pub fn json_leaves(
    path_to_array: &str,
    leaf_pointer: &str,
    json: &str,
    null_on_non_array: bool,
) -> Result<Option<String>> {
    let Some(tree) = json_subtree(path_to_array, json)? else {
        return Ok(None);
    };
    let items = match tree {
        Value::Array(items) => items,
        _ if null_on_non_array => return Ok(None),
        other => bail!(
            "The node at {path_to_array} is not an array value, but {}",
            node_kind(&other)
        ),
    };
    let leaves: Vec<Option<&str>> = items
        .iter()
        .map(|item| item.pointer(leaf_pointer).and_then(Value::as_str))
        .collect();
    Ok(Some(serde_json::to_string(&leaves)?))
}

fn node_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}
