use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("路径为空")]
    Empty,

    #[error("路径 {path} 中缺少中间字段 {segment}")]
    MissingSegment { path: String, segment: String },

    #[error("路径 {path} 中的 {segment} 不是对象")]
    NotAnObject { path: String, segment: String },
}

/// 按点分路径读取上下文中的值
///
/// 中间字段缺失视为错误,最后一段缺失返回 null
pub fn get_path(data: &Value, path: &str) -> Result<Value, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let parts: Vec<&str> = path.split('.').collect();
    let last = parts.len() - 1;
    let mut current = data;

    for (i, part) in parts.iter().enumerate() {
        let next = match current {
            Value::Object(obj) => obj.get(*part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        };

        match next {
            Some(value) => current = value,
            None if i == last && matches!(current, Value::Object(_) | Value::Array(_)) => {
                return Ok(Value::Null)
            }
            None => {
                return Err(PathError::MissingSegment {
                    path: path.to_string(),
                    segment: part.to_string(),
                })
            }
        }
    }

    Ok(current.clone())
}

/// 按点分路径写入值,自动创建缺失的中间对象
pub fn set_path(data: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let parts: Vec<&str> = path.split('.').collect();
    let (last, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(PathError::Empty),
    };

    let mut current = data;
    for part in parents {
        let obj = current.as_object_mut().ok_or_else(|| PathError::NotAnObject {
            path: path.to_string(),
            segment: part.to_string(),
        })?;
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let obj = current.as_object_mut().ok_or_else(|| PathError::NotAnObject {
        path: path.to_string(),
        segment: last.to_string(),
    })?;
    obj.insert(last.to_string(), value);
    Ok(())
}

/// 值的字符串形式,用于 contains / regex 比较
pub fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items
            .iter()
            .map(string_form)
            .collect::<Vec<_>>()
            .join(","),
        _ => value.to_string(),
    }
}
