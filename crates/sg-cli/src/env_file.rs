//! Best-effort `.env` loading.

use std::path::Path;

/// Loads `KEY=value` lines from `path` into the process environment. Call
/// it before any other thread is started.
///
/// Variables that are already set win. Returns how many were applied; a
/// missing file counts as zero.
pub fn load(path: &Path) -> std::io::Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let content = std::fs::read_to_string(path)?;
    let mut applied = 0;
    for (key, value) in parse(&content) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parses env-file syntax: comments, blank lines, optional `export` prefix
/// and quoted values.
fn parse(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_lines() {
        let parsed = parse(
            "# neo4j\nneo4j_user=neo4j\n\nexport neo4j_host = graphdb \nneo4j_password=\"p=ss\"\nbroken line\n=novalue\n",
        );

        assert_eq!(
            parsed,
            vec![
                ("neo4j_user".to_string(), "neo4j".to_string()),
                ("neo4j_host".to_string(), "graphdb".to_string()),
                ("neo4j_password".to_string(), "p=ss".to_string()),
            ]
        );
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"\""), "");
        assert_eq!(unquote("\"abc"), "\"abc");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_load_keeps_existing_values() {
        std::env::set_var("SG_ENV_FILE_TEST_EXISTING", "from-env");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SG_ENV_FILE_TEST_EXISTING=from-file").unwrap();
        writeln!(file, "SG_ENV_FILE_TEST_NEW=from-file").unwrap();

        let applied = load(file.path()).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(std::env::var("SG_ENV_FILE_TEST_EXISTING").unwrap(), "from-env");
        assert_eq!(std::env::var("SG_ENV_FILE_TEST_NEW").unwrap(), "from-file");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("absent.env")).unwrap(), 0);
    }
}
