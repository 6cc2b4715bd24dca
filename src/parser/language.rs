//! Per-language defaults used when a reply does not name its files.

/// File naming and detection hints for one target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    /// Canonical display name.
    pub name: &'static str,
    /// Extension (without dot) for the synthesized entry point.
    pub extension: &'static str,
    /// Dependency manifest filename.
    pub manifest: &'static str,
    /// Line prefixes that mark a block as source code in this language.
    pub keywords: &'static [&'static str],
}

const PYTHON: LanguageProfile = LanguageProfile {
    name: "Python",
    extension: "py",
    manifest: "requirements.txt",
    keywords: &["def ", "import ", "from ", "class ", "print(", "if __name__"],
};

const JAVASCRIPT: LanguageProfile = LanguageProfile {
    name: "JavaScript",
    extension: "js",
    manifest: "package.json",
    keywords: &["function ", "const ", "let ", "console.log", "require(", "module.exports"],
};

const TYPESCRIPT: LanguageProfile = LanguageProfile {
    name: "TypeScript",
    extension: "ts",
    manifest: "package.json",
    keywords: &["interface ", "function ", "const ", "export ", "import ", "type "],
};

const RUST: LanguageProfile = LanguageProfile {
    name: "Rust",
    extension: "rs",
    manifest: "Cargo.toml",
    keywords: &["fn ", "pub fn ", "use ", "struct ", "impl ", "mod "],
};

const GO: LanguageProfile = LanguageProfile {
    name: "Go",
    extension: "go",
    manifest: "go.mod",
    keywords: &["package ", "func ", "import "],
};

/// Resolves a target language name (case-insensitive) to its profile.
///
/// Unknown languages fall back to the Python profile, which matches the
/// sandbox's default toolchain.
pub fn profile_for(language: &str) -> LanguageProfile {
    match language.trim().to_ascii_lowercase().as_str() {
        "python" | "py" | "python3" => PYTHON,
        "javascript" | "js" | "node" | "nodejs" => JAVASCRIPT,
        "typescript" | "ts" => TYPESCRIPT,
        "rust" | "rs" => RUST,
        "go" | "golang" => GO,
        other => {
            tracing::debug!(language = other, "Unknown target language, using Python defaults");
            PYTHON
        }
    }
}

impl LanguageProfile {
    /// Entry point filename, e.g. `main.py`.
    pub fn entry_point(&self) -> String {
        format!("main.{}", self.extension)
    }

    /// Returns true if any line of `body` starts with one of the language keywords.
    pub fn looks_like_source(&self, body: &str) -> bool {
        body.lines().any(|line| {
            let line = line.trim_start();
            self.keywords.iter().any(|kw| line.starts_with(kw))
        })
    }
}

/// Returns true if `language` is the one the default sandbox can test.
pub fn is_python(language: &str) -> bool {
    matches!(
        language.trim().to_ascii_lowercase().as_str(),
        "python" | "py" | "python3"
    )
}
