use crate::error::{DeployError, Result};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 실행할 SQL 스크립트 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUnit {
    /// 전체 경로 (정렬 기준)
    pub path: PathBuf,
    /// 파일 이름 (감사 기록에 사용)
    pub name: String,
    /// 미리 주어진 SQL, 없으면 실행할 때 파일에서 읽음
    content: Option<String>,
}

impl ScriptUnit {
    /// SQL 을 직접 지정해서 생성
    pub fn new(path: PathBuf, content: String) -> Self {
        let mut unit = Self::from_path(path);
        unit.content = Some(content);
        unit
    }

    /// 실행 시점에 파일을 읽는 스크립트
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path,
            name,
            content: None,
        }
    }

    /// 실행할 SQL 전체
    ///
    /// 읽기 실패는 이 스크립트 하나의 실패이므로 호출자에게 그대로 돌려줍니다.
    pub fn read_content(&self) -> io::Result<Cow<'_, str>> {
        match &self.content {
            Some(content) => Ok(Cow::Borrowed(content)),
            None => fs::read_to_string(&self.path).map(Cow::Owned),
        }
    }
}

/// 스크립트 탐색기 - 루트 디렉토리 아래의 `*.sql` 파일을 재귀적으로 수집
pub struct ScriptSource {
    root: PathBuf,
}

impl ScriptSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 정렬된 스크립트 목록 반환
    ///
    /// 경로 문자열의 사전순으로 정렬하며 숨김 파일과 빈 파일도 포함합니다.
    /// 파일 내용은 각 스크립트를 실행할 때 읽습니다.
    pub fn discover(&self) -> Result<Vec<ScriptUnit>> {
        let paths = self.discover_paths()?;
        Ok(paths.into_iter().map(ScriptUnit::from_path).collect())
    }

    /// 정렬, 중복 제거된 `*.sql` 파일 경로 목록
    pub fn discover_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            warn!(root = %self.root.display(), "scripts root does not exist, nothing to deploy");
            return Ok(Vec::new());
        }

        let root = self.root.to_string_lossy();
        let pattern = format!(
            "{}/**/*.sql",
            glob::Pattern::escape(root.trim_end_matches('/'))
        );
        debug!(%pattern, "discovering scripts");

        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let entries = glob::glob_with(&pattern, options)
            .map_err(|e| DeployError::Discovery(format!("invalid pattern {}: {}", pattern, e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| DeployError::Discovery(e.to_string()))?;

            // "*.sql" 이름의 디렉토리만 제외, 깨진 심볼릭 링크는 실행 단계에서 실패로 기록
            if !path.is_dir() {
                paths.push(path);
            }
        }

        sort_by_path_string(&mut paths);
        paths.dedup();

        debug!(count = paths.len(), "scripts discovered");
        Ok(paths)
    }
}

/// 경로를 문자열 사전순으로 정렬
///
/// `PathBuf` 의 `Ord` 는 컴포넌트 단위 비교라서 `a-b/x.sql` 과 `a/y.sql` 의
/// 순서가 문자열 비교와 다릅니다.
pub fn sort_by_path_string(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn names(units: &[ScriptUnit]) -> Vec<String> {
        units.iter().map(|u| u.name.clone()).collect()
    }

    #[test]
    fn test_discover_sorted_recursive() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "V2__views.sql", "CREATE VIEW v AS SELECT 1;");
        write(tmp.path(), "V1__tables.sql", "CREATE TABLE t (id INT);");
        write(tmp.path(), "schemas/V0__schema.sql", "CREATE SCHEMA s;");
        write(tmp.path(), "README.md", "not sql");

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        assert_eq!(names(&units), vec!["V1__tables.sql", "V2__views.sql", "V0__schema.sql"]);
        assert_eq!(units[0].read_content().unwrap(), "CREATE TABLE t (id INT);");
    }

    #[test]
    fn test_string_ordering_not_component_ordering() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a/y.sql", "SELECT 1;");
        write(tmp.path(), "a-b/x.sql", "SELECT 2;");

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        // '-' (0x2D) < '/' (0x2F)
        assert_eq!(names(&units), vec!["x.sql", "y.sql"]);
    }

    #[test]
    fn test_hidden_and_empty_files_included() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".hidden.sql", "SELECT 1;");
        write(tmp.path(), "empty.sql", "");

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        assert_eq!(names(&units), vec![".hidden.sql", "empty.sql"]);
        assert_eq!(units[1].read_content().unwrap(), "");
    }

    #[test]
    fn test_sql_named_directory_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "odd.sql/inner.sql", "SELECT 1;");

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        assert_eq!(names(&units), vec!["inner.sql"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let units = ScriptSource::new(tmp.path().join("nope")).discover().unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_invalid_utf8_still_discovered() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "V1.sql", "SELECT 1;");
        fs::write(tmp.path().join("V2.sql"), b"SELECT 'caf\xe9';").unwrap();

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        assert_eq!(names(&units), vec!["V1.sql", "V2.sql"]);
        assert!(units[0].read_content().is_ok());
        assert_eq!(
            units[1].read_content().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_still_discovered() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone.sql"), tmp.path().join("link.sql")).unwrap();

        let units = ScriptSource::new(tmp.path()).discover().unwrap();

        assert_eq!(names(&units), vec!["link.sql"]);
        assert!(units[0].read_content().is_err());
    }

    #[test]
    fn test_script_unit_name_is_basename() {
        let unit = ScriptUnit::new(PathBuf::from("Snowflake/tables/V1__init.sql"), String::new());
        assert_eq!(unit.name, "V1__init.sql");
    }
}
