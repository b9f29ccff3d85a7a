/// Path processing utility functions / 路径处理工具函数

/// Clean and normalize path / 清理和规范化路径
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Ensure path starts with / / 确保路径以 / 开头
/// 3. Clean . and .. in path / 清理路径中的 . 和 ..
pub fn fix_and_clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    format!("/{}", parts.join("/"))
}

/// Join a path onto the work dir and return the backend key / 计算后端绝对路径
///
/// Keys have no leading slash. A trailing slash on `path` is kept so that
/// prefix listings of "dir/" stay directory-scoped.
pub fn abs_path(work_dir: &str, path: &str) -> String {
    let joined = fix_and_clean_path(&format!("{}/{}", work_dir, path));
    let key = joined.trim_start_matches('/');
    if path.ends_with('/') && !key.is_empty() {
        format!("{}/", key)
    } else {
        key.to_string()
    }
}

/// Strip the work dir from a backend key / 计算相对路径
pub fn rel_path(work_dir: &str, key: &str) -> String {
    let prefix = fix_and_clean_path(work_dir);
    let prefix = prefix.trim_start_matches('/');
    if prefix.is_empty() {
        return key.to_string();
    }
    key.strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(key)
        .to_string()
}
