//! Configuration DSL loader.
//!
//! A hand-written tokenizer and recursive-descent parser over the
//! `key = value;` / `block { ... }` grammar described in the crate
//! docs: top-level assignments, `logging`/`security` blocks, one or
//! more `host(...)  { ... }` blocks, and `include`/`include_optional`
//! directives that glob-expand and recursively parse referenced files.
//!
//! Loading is all-or-nothing: [`load`] returns a fully validated
//! [`FhConfig`] or a [`ConfigError`], never a partially-applied tree.

use crate::errors::ConfigError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LoggingConfig {
    pub(crate) enabled: bool,
    pub(crate) min_level: Level,
    pub(crate) file: Option<PathBuf>,
    pub(crate) error_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            enabled: true,
            min_level: Level::Info,
            file: None,
            error_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SecurityConfig {
    pub(crate) max_response_body_size: u64,
    pub(crate) max_connections: usize,
    pub(crate) recv_timeout: u64,
    pub(crate) send_timeout: u64,
    pub(crate) header_timeout: u64,
    pub(crate) body_timeout: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            max_response_body_size: 128 * 1024 * 1024,
            max_connections: 10_000,
            recv_timeout: 30,
            send_timeout: 30,
            header_timeout: 10,
            body_timeout: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HostConfig {
    pub(crate) names: Vec<(String, u16)>,
    pub(crate) is_default: bool,
    pub(crate) docroot: PathBuf,
    pub(crate) logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone)]
pub(crate) struct FhConfig {
    pub(crate) root_docroot: Option<PathBuf>,
    pub(crate) worker_count: usize,
    pub(crate) logging: LoggingConfig,
    pub(crate) security: SecurityConfig,
    pub(crate) hosts: Vec<HostConfig>,
}

/// Parses `path` (and everything it `include`s) into a validated
/// [`FhConfig`].
pub(crate) fn load(path: &Path) -> Result<FhConfig, ConfigError> {
    let mut builder = Builder::default();
    let mut visited = HashSet::new();
    parse_file(path, &mut builder, &mut visited)?;
    builder.finish()
}

#[derive(Default)]
struct Builder {
    root_docroot: Option<PathBuf>,
    worker_count: Option<usize>,
    logging: LoggingConfig,
    security: SecurityConfig,
    hosts: Vec<HostConfig>,
}

impl Builder {
    fn finish(self) -> Result<FhConfig, ConfigError> {
        let defaults: Vec<&HostConfig> = self.hosts.iter().filter(|h| h.is_default).collect();
        match defaults.as_slice() {
            [] => return Err(ConfigError::NoDefaultHost),
            [_one] => {}
            [first, second, ..] => {
                return Err(ConfigError::MultipleDefaultHosts {
                    first: first.names.first().map(|(n, _)| n.clone()).unwrap_or_default(),
                    second: second.names.first().map(|(n, _)| n.clone()).unwrap_or_default(),
                });
            }
        }
        Ok(FhConfig {
            root_docroot: self.root_docroot,
            worker_count: self.worker_count.unwrap_or(8),
            logging: self.logging,
            security: self.security,
            hosts: self.hosts,
        })
    }
}

fn parse_file(path: &Path, builder: &mut Builder, visited: &mut HashSet<PathBuf>) -> Result<(), ConfigError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        return Err(ConfigError::RecursiveInclude {
            path: path.to_path_buf(),
            line: 0,
            pattern: path.display().to_string(),
        });
    }

    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let tokens = tokenize(&source);
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        path,
    };
    parser.parse_top_level(builder, visited)?;

    visited.remove(&canonical);
    Ok(())
}

// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Symbol(char),
    Eof,
}

struct Spanned {
    tok: Token,
    line: usize,
}

fn tokenize(src: &str) -> Vec<Spanned> {
    let mut out = Vec::new();
    let mut line = 1usize;
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '"' => {
                let start_line = line;
                i += 1;
                let mut s = String::new();
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    s.push(bytes[i] as char);
                    i += 1;
                }
                i += 1; // closing quote
                out.push(Spanned { tok: Token::Str(s), line: start_line });
            }
            '{' | '}' | '(' | ')' | ',' | ';' | '=' | ':' => {
                out.push(Spanned { tok: Token::Symbol(c), line });
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' || c == '/' || c == '-' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '/' || c == '-' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push(Spanned {
                    tok: Token::Ident(src[start..i].to_string()),
                    line,
                });
            }
            _ => i += 1,
        }
    }
    out.push(Spanned { tok: Token::Eof, line });
    out
}

// Recursive-descent parser

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    path: &'a Path,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_symbol(&mut self, sym: char) -> Result<(), ConfigError> {
        if self.peek() == &Token::Symbol(sym) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected '{sym}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ConfigError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            _ => Err(self.err("expected identifier".to_string())),
        }
    }

    fn expect_value(&mut self) -> Result<String, ConfigError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            Token::Str(s) => Ok(s),
            _ => Err(self.err("expected value".to_string())),
        }
    }

    fn err(&self, message: String) -> ConfigError {
        ConfigError::Syntax {
            path: self.path.to_path_buf(),
            line: self.line(),
            message,
        }
    }

    fn parse_top_level(&mut self, builder: &mut Builder, visited: &mut HashSet<PathBuf>) -> Result<(), ConfigError> {
        loop {
            match self.peek().clone() {
                Token::Eof => return Ok(()),
                Token::Ident(kw) if kw == "logging" => {
                    self.advance();
                    builder.logging = self.parse_logging_block()?;
                }
                Token::Ident(kw) if kw == "security" => {
                    self.advance();
                    builder.security = self.parse_security_block()?;
                }
                Token::Ident(kw) if kw == "host" => {
                    self.advance();
                    let host = self.parse_host_block()?;
                    builder.hosts.push(host);
                }
                Token::Ident(kw) if kw == "include" || kw == "include_optional" => {
                    self.advance();
                    let optional = kw == "include_optional";
                    let pattern = self.expect_value()?;
                    self.expect_symbol(';')?;
                    self.process_include(&pattern, optional, builder, visited)?;
                }
                Token::Ident(key) => {
                    self.advance();
                    self.expect_symbol('=')?;
                    let value = self.expect_value()?;
                    self.expect_symbol(';')?;
                    match key.as_str() {
                        "root" => builder.root_docroot = Some(PathBuf::from(value)),
                        "worker_count" => {
                            builder.worker_count = Some(value.parse().map_err(|_| {
                                self.err(format!("invalid worker_count {value:?}"))
                            })?);
                        }
                        other => return Err(self.err(format!("unknown top-level key {other:?}"))),
                    }
                }
                _ => return Err(self.err("expected a top-level key, block, or include".to_string())),
            }
        }
    }

    fn process_include(
        &mut self,
        pattern: &str,
        optional: bool,
        builder: &mut Builder,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<(), ConfigError> {
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        let full_pattern = base.join(pattern);
        let matches: Vec<PathBuf> = glob::glob(&full_pattern.to_string_lossy())
            .map_err(|e| self.err(format!("invalid include glob {pattern:?}: {e}")))?
            .filter_map(Result::ok)
            .collect();

        if matches.is_empty() {
            if optional {
                return Ok(());
            }
            return Err(ConfigError::Syntax {
                path: self.path.to_path_buf(),
                line: self.line(),
                message: format!("include {pattern:?} matched no files"),
            });
        }

        for included in matches {
            parse_file(&included, builder, visited).map_err(|err| match err {
                ConfigError::RecursiveInclude { path, .. } => ConfigError::RecursiveInclude {
                    path,
                    line: self.line(),
                    pattern: pattern.to_string(),
                },
                other => other,
            })?;
        }
        Ok(())
    }

    fn parse_block_body(&mut self) -> Result<Vec<(String, String)>, ConfigError> {
        self.expect_symbol('{')?;
        let mut pairs = Vec::new();
        loop {
            if self.peek() == &Token::Symbol('}') {
                self.advance();
                return Ok(pairs);
            }
            let key = self.expect_ident()?;
            self.expect_symbol('=')?;
            let value = self.expect_value()?;
            self.expect_symbol(';')?;
            pairs.push((key, value));
        }
    }

    fn parse_logging_block(&mut self) -> Result<LoggingConfig, ConfigError> {
        let pairs = self.parse_block_body()?;
        let mut cfg = LoggingConfig::default();
        for (key, value) in pairs {
            match key.as_str() {
                "enabled" => cfg.enabled = value == "yes",
                "min_level" => {
                    cfg.min_level = Level::parse(&value).ok_or_else(|| self.err(format!("invalid min_level {value:?}")))?
                }
                "file" => cfg.file = Some(PathBuf::from(value)),
                "error_file" => cfg.error_file = Some(PathBuf::from(value)),
                other => return Err(self.err(format!("unknown logging key {other:?}"))),
            }
        }
        Ok(cfg)
    }

    fn parse_security_block(&mut self) -> Result<SecurityConfig, ConfigError> {
        let pairs = self.parse_block_body()?;
        let mut cfg = SecurityConfig::default();
        for (key, value) in pairs {
            let n: u64 = value.parse().map_err(|_| self.err(format!("invalid numeric value {value:?} for {key}")))?;
            match key.as_str() {
                "max_response_body_size" => cfg.max_response_body_size = n,
                "max_connections" => cfg.max_connections = n as usize,
                "recv_timeout" => cfg.recv_timeout = n,
                "send_timeout" => cfg.send_timeout = n,
                "header_timeout" => cfg.header_timeout = n,
                "body_timeout" => cfg.body_timeout = n,
                other => return Err(self.err(format!("unknown security key {other:?}"))),
            }
        }
        Ok(cfg)
    }

    fn parse_host_block(&mut self) -> Result<HostConfig, ConfigError> {
        self.expect_symbol('(')?;
        let mut names = Vec::new();
        loop {
            let raw = self.expect_value()?;
            names.push(parse_hostport(&raw).ok_or_else(|| ConfigError::InvalidListenAddress(raw.clone()))?);
            match self.peek() {
                Token::Symbol(',') => {
                    self.advance();
                }
                Token::Symbol(')') => {
                    self.advance();
                    break;
                }
                _ => return Err(self.err("expected ',' or ')' in host name list".to_string())),
            }
        }

        self.expect_symbol('{')?;
        let mut is_default = false;
        let mut docroot = PathBuf::new();
        let mut logging = None;
        loop {
            match self.peek().clone() {
                Token::Symbol('}') => {
                    self.advance();
                    break;
                }
                Token::Ident(kw) if kw == "logging" => {
                    self.advance();
                    logging = Some(self.parse_logging_block()?);
                }
                Token::Ident(key) => {
                    self.advance();
                    self.expect_symbol('=')?;
                    let value = self.expect_value()?;
                    self.expect_symbol(';')?;
                    match key.as_str() {
                        "is_default" => is_default = value == "yes",
                        "docroot" => docroot = PathBuf::from(value),
                        other => return Err(self.err(format!("unknown host key {other:?}"))),
                    }
                }
                _ => return Err(self.err("expected a host key or '}'".to_string())),
            }
        }

        Ok(HostConfig {
            names,
            is_default,
            docroot,
            logging,
        })
    }
}

/// Parses `hostname[:port]`, defaulting to port 80 when no `:` is
/// present.
fn parse_hostport(s: &str) -> Option<(String, u16)> {
    match s.split_once(':') {
        Some((name, port)) => port.parse().ok().map(|p| (name.to_string(), p)),
        None => Some((s.to_string(), 80)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_minimal_single_default_host() {
        let f = write_temp(
            r#"
            root = "/srv/www";
            worker_count = 4;
            host ("example.com:8080") {
                is_default = yes;
                docroot = "/srv/www/example";
            }
            "#,
        );
        let cfg = load(f.path()).unwrap();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.hosts.len(), 1);
        assert!(cfg.hosts[0].is_default);
        assert_eq!(cfg.hosts[0].names, vec![("example.com".to_string(), 8080)]);
    }

    #[test]
    fn missing_default_host_is_rejected() {
        let f = write_temp(
            r#"
            host ("example.com") {
                is_default = no;
                docroot = "/srv/www";
            }
            "#,
        );
        assert!(matches!(load(f.path()), Err(ConfigError::NoDefaultHost)));
    }

    #[test]
    fn two_default_hosts_are_rejected() {
        let f = write_temp(
            r#"
            host ("a.com") { is_default = yes; docroot = "/a"; }
            host ("b.com") { is_default = yes; docroot = "/b"; }
            "#,
        );
        assert!(matches!(load(f.path()), Err(ConfigError::MultipleDefaultHosts { .. })));
    }

    #[test]
    fn logging_and_security_blocks_are_parsed() {
        let f = write_temp(
            r#"
            logging { enabled = yes; min_level = "warn"; }
            security { max_connections = 500; recv_timeout = 5; }
            host ("x.com") { is_default = yes; docroot = "/x"; }
            "#,
        );
        let cfg = load(f.path()).unwrap();
        assert_eq!(cfg.logging.min_level, Level::Warn);
        assert_eq!(cfg.security.max_connections, 500);
    }

    #[test]
    fn bare_hostname_implies_port_80() {
        assert_eq!(parse_hostport("example.com"), Some(("example.com".to_string(), 80)));
        assert_eq!(parse_hostport("example.com:8080"), Some(("example.com".to_string(), 8080)));
        assert_eq!(parse_hostport("example.com:notaport"), None);
    }
}
