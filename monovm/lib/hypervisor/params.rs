use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A key/value pair for kernel and hypervisor command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// The parameter name.
    pub key: String,

    /// The parameter value, possibly empty.
    pub value: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Param {
    /// Creates a new parameter.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Flattens parameters into command line words.
///
/// Pairs with neither key nor value are dropped. A missing key or value yields the other half
/// alone. With an empty `delim` key and value become two separate words, otherwise they are
/// joined as `key<delim>value`.
///
/// ## Examples
///
/// ```
/// use monovm::hypervisor::{serialize_params, Param};
///
/// let params = vec![Param::new("console", "hvc0"), Param::new("quiet", "")];
/// assert_eq!(serialize_params(&params, "="), vec!["console=hvc0", "quiet"]);
/// assert_eq!(serialize_params(&params, ""), vec!["console", "hvc0", "quiet"]);
/// ```
pub fn serialize_params(params: &[Param], delim: &str) -> Vec<String> {
    let mut words = Vec::new();

    for p in params {
        match (p.key.is_empty(), p.value.is_empty()) {
            (true, true) => continue,
            (true, false) => words.push(p.value.clone()),
            (false, true) => words.push(p.key.clone()),
            (false, false) if delim.is_empty() => {
                words.push(p.key.clone());
                words.push(p.value.clone());
            }
            (false, false) => words.push(format!("{}{}{}", p.key, delim, p.value)),
        }
    }

    words
}

/// Parses `key=value` words back into parameters. Empty words are skipped and words without
/// `=` become keys with an empty value.
pub fn deserialize_params<S: AsRef<str>>(words: &[S]) -> Vec<Param> {
    words
        .iter()
        .map(AsRef::as_ref)
        .filter(|w| !w.is_empty())
        .map(|w| match w.split_once('=') {
            Some((key, value)) => Param::new(key, value),
            None => Param::new(w, ""),
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_params() {
        assert!(serialize_params(&[Param::new("", "")], "").is_empty());
        assert_eq!(serialize_params(&[Param::new("", "value1")], ""), vec!["value1"]);
        assert_eq!(serialize_params(&[Param::new("param1", "")], ""), vec!["param1"]);
        assert_eq!(
            serialize_params(&[Param::new("param1", "value1")], ""),
            vec!["param1", "value1"]
        );
        assert_eq!(
            serialize_params(&[Param::new("param1", "value1")], "="),
            vec!["param1=value1"]
        );
    }

    #[test]
    fn test_deserialize_params() {
        let words = ["param1=value1", "", "param2", "param3=a=b"];

        assert_eq!(
            deserialize_params(&words),
            vec![
                Param::new("param1", "value1"),
                Param::new("param2", ""),
                Param::new("param3", "a=b"),
            ]
        );
    }
}
