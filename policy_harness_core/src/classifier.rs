use crate::error::HarnessError;
use crate::strvec::StringArray;
use std::fmt;

/// Keys routed to the plugin's own argument vector.
pub const PLUGIN_ARG_KEYS: &[&str] = &[
    "error_recovery=",
    "sudoers_file=",
    "sudoers_mode=",
    "sudoers_gid=",
    "sudoers_uid=",
    "ldap_conf=",
    "ldap_secret=",
];

/// Keys describing the invoking user. `rlimit_` covers the whole `rlimit_*` family.
pub const USER_INFO_KEYS: &[&str] = &[
    "user=", "uid=", "gid=", "groups=", "cwd=", "tty=", "host=", "lines=", "cols=", "sid=",
    "umask=", "rlimit_",
];

/// Each `argv=` line is one command-line word; the first is the command.
pub const ARGV_KEY: &str = "argv=";

/// Each `env=` line is one environment addition.
pub const ENV_KEY: &str = "env=";

/// The collection a line is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    PluginArg,
    UserInfo,
    Setting,
    Argv,
    EnvAdd,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::PluginArg,
        Category::UserInfo,
        Category::Setting,
        Category::Argv,
        Category::EnvAdd,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::PluginArg => "plugin-argument",
            Category::UserInfo => "user-info",
            Category::Setting => "setting",
            Category::Argv => "argv-entry",
            Category::EnvAdd => "env-addition",
        };
        f.write_str(name)
    }
}

/// The part of a record a C consumer would see: everything before the first NUL.
pub fn c_str_view(record: &[u8]) -> &[u8] {
    let end = record.iter().position(|&b| b == 0).unwrap_or(record.len());
    &record[..end]
}

/// Routes one decoded line, or returns `None` for comments and blank lines.
///
/// Matching is an exact, case-sensitive prefix test in fixed priority order.
pub fn classify(line: &[u8]) -> Option<Category> {
    let line = c_str_view(line);
    match line.first() {
        None | Some(b'#') => return None,
        Some(_) => {}
    }

    let has_any = |keys: &[&str]| keys.iter().any(|key| line.starts_with(key.as_bytes()));

    let category = if has_any(PLUGIN_ARG_KEYS) {
        Category::PluginArg
    } else if has_any(USER_INFO_KEYS) {
        Category::UserInfo
    } else if line.starts_with(ARGV_KEY.as_bytes()) {
        Category::Argv
    } else if line.starts_with(ENV_KEY.as_bytes()) {
        Category::EnvAdd
    } else {
        Category::Setting
    };
    Some(category)
}

/// Per-category line counts for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryCounts {
    pub plugin_args: usize,
    pub user_info: usize,
    pub settings: usize,
    pub argv: usize,
    pub env_add: usize,
    pub discarded: usize,
}

/// The five collections assembled from one fuzz input.
#[derive(Debug, Default)]
pub struct Collections {
    pub plugin_args: StringArray,
    pub user_info: StringArray,
    pub settings: StringArray,
    pub argv: StringArray,
    pub env_add: StringArray,
    discarded: usize,
    entry_limit: Option<usize>,
}

impl Collections {
    /// Empty collections with user-info and settings already present.
    pub fn new() -> Result<Self, HarnessError> {
        let mut collections = Self::default();
        collections.user_info.push(None)?;
        collections.settings.push(None)?;
        Ok(collections)
    }

    /// Classifies every line, stopping at the first allocation failure.
    pub fn from_lines<I>(lines: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Self::from_lines_limited(lines, None)
    }

    /// Like [`Collections::from_lines`], but a collection that would grow past
    /// `entry_limit` entries fails the same way an allocation failure does.
    pub fn from_lines_limited<I>(lines: I, entry_limit: Option<usize>) -> Result<Self, HarnessError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut collections = Self::new()?;
        collections.entry_limit = entry_limit;
        for line in lines {
            collections.push_line(line.as_ref())?;
        }
        Ok(collections)
    }

    /// Pushes the original line into the collection it belongs to.
    pub fn push_line(&mut self, line: &[u8]) -> Result<Option<Category>, HarnessError> {
        let Some(category) = classify(line) else {
            self.discarded += 1;
            return Ok(None);
        };
        let limit = self.entry_limit;
        let array = self.array_mut(category);
        if let Some(limit) = limit {
            if array.len() >= limit {
                return Err(HarnessError::EntryLimit { category, limit });
            }
        }
        array.push(Some(line))?;
        Ok(Some(category))
    }

    pub fn array(&self, category: Category) -> &StringArray {
        match category {
            Category::PluginArg => &self.plugin_args,
            Category::UserInfo => &self.user_info,
            Category::Setting => &self.settings,
            Category::Argv => &self.argv,
            Category::EnvAdd => &self.env_add,
        }
    }

    pub fn array_mut(&mut self, category: Category) -> &mut StringArray {
        match category {
            Category::PluginArg => &mut self.plugin_args,
            Category::UserInfo => &mut self.user_info,
            Category::Setting => &mut self.settings,
            Category::Argv => &mut self.argv,
            Category::EnvAdd => &mut self.env_add,
        }
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts {
            plugin_args: self.plugin_args.len(),
            user_info: self.user_info.len(),
            settings: self.settings.len(),
            argv: self.argv.len(),
            env_add: self.env_add.len(),
            discarded: self.discarded,
        }
    }

    /// Releases all five arrays. Absent arrays are skipped.
    ///
    /// Returns how many arrays actually held an allocation.
    pub fn release(&mut self) -> usize {
        let mut released = 0;
        for category in Category::ALL {
            let array = self.array_mut(category);
            if array.is_present() {
                released += 1;
            }
            array.release();
        }
        self.discarded = 0;
        released
    }
}
