//! Minimal `krb5.conf` reader.
//!
//! Values are stored under their `|` joined path (`libdefaults|clockskew`,
//! `realms|EXAMPLE.COM|kdc`). Keys are compared case-insensitively.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::Result;

fn is_comment_or_empty(line: &str) -> bool {
    matches!(line.chars().next(), None | Some('#') | Some(';'))
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|line| line.strip_suffix(']'))
        .map(str::trim)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Conf {
    values: Vec<(String, String)>,
}

impl Krb5Conf {
    /// Parses the file. Returns `None` when it does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(Self::from_reader(BufReader::new(file))?))
    }

    pub fn from_data(data: &str) -> Result<Self> {
        Self::from_reader(data.as_bytes())
    }

    fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut config = Self::default();
        // Current section followed by the open `{` groups.
        let mut path: Vec<String> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if is_comment_or_empty(line) {
                continue;
            }

            if let Some(name) = section_name(line) {
                path = vec![name.to_owned()];
                continue;
            }

            if line.starts_with('}') {
                if path.len() > 1 {
                    path.pop();
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if value == "{" {
                path.push(key.to_owned());
            } else {
                let mut full_path = path.clone();
                full_path.push(key.to_owned());
                config.values.push((full_path.join("|"), value.to_owned()));
            }
        }

        Ok(config)
    }

    /// Returns the first value stored under the path.
    pub fn get_value(&self, path: &[&str]) -> Option<&str> {
        self.get_values(path).into_iter().next()
    }

    /// Returns every value stored under the path, in file order.
    pub fn get_values(&self, path: &[&str]) -> Vec<&str> {
        let path = path.join("|");

        self.values
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(&path))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}
