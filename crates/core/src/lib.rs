#![forbid(unsafe_code)]

pub mod arg;

pub mod ids {
    /// Identity of one queue database. Stable across processes; used to
    /// address jobs as `(shard, jobid)` pairs.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ShardId(String);

    impl ShardId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, ShardIdError> {
            let value = value.into();
            validate_shard_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for ShardId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum ShardIdError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for ShardIdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "shard id must not be empty"),
                Self::TooLong => write!(f, "shard id exceeds 64 chars"),
                Self::InvalidFirstChar => {
                    write!(f, "shard id must start with an ascii alphanumeric")
                }
                Self::InvalidChar { ch, index } => {
                    write!(f, "shard id has invalid char {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for ShardIdError {}

    fn validate_shard_id(value: &str) -> Result<(), ShardIdError> {
        if value.is_empty() {
            return Err(ShardIdError::Empty);
        }
        if value.len() > 64 {
            return Err(ShardIdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(ShardIdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(ShardIdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(ShardIdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum FuncNameError {
        Empty,
        TooLong,
        ContainsControl,
    }

    impl std::fmt::Display for FuncNameError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "funcname must not be empty"),
                Self::TooLong => write!(f, "funcname exceeds 255 bytes"),
                Self::ContainsControl => write!(f, "funcname must not contain control chars"),
            }
        }
    }

    impl std::error::Error for FuncNameError {}

    /// Funcnames are free-form symbolic names; they are interned per shard,
    /// so the only hard limits are the interning row width and sanity.
    pub fn validate_funcname(value: &str) -> Result<(), FuncNameError> {
        if value.trim().is_empty() {
            return Err(FuncNameError::Empty);
        }
        if value.len() > 255 {
            return Err(FuncNameError::TooLong);
        }
        if value.chars().any(char::is_control) {
            return Err(FuncNameError::ContainsControl);
        }
        Ok(())
    }

}
