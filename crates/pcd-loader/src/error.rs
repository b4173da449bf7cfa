//! Error types for dataset loading

use std::path::PathBuf;

/// Dataset loading error
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The dataset folder does not exist
    #[error("dataset folder {0} does not exist")]
    MissingDataset(PathBuf),

    /// The instance rejected a patient record
    #[error("attempt to load patient {file} failed with HTTP {status}")]
    PatientUpload {
        /// Patient file
        file: String,
        /// Response status
        status: u16,
    },

    /// A created patient has no usable `Location` header
    #[error("patient {0} was created but no id was returned")]
    MissingPatientId(String),

    /// Consents could not be granted
    #[error("granting consents to patient {patient} failed with HTTP {status}")]
    Consents {
        /// Patient id
        patient: String,
        /// Response status
        status: u16,
    },

    /// The import page used to obtain a form token is not reachable
    #[error("can't access XAR import page {url}, status code {status}")]
    ImportPage {
        /// Page URL
        url: String,
        /// Response status
        status: u16,
    },

    /// The import page carries no form token
    #[error("can't upload XAR: form token not found on the import page")]
    MissingFormToken,

    /// The XAR upload was rejected
    #[error("unexpected response ({status}) from uploading XAR file {file}")]
    XarUpload {
        /// Archive path
        file: PathBuf,
        /// Response status
        status: u16,
    },

    /// Importing pages from the uploaded XAR failed
    #[error("importing XAR pages failed with HTTP {0}")]
    XarImport(u16),

    /// The XAR file is not a readable zip archive
    #[error("reading XAR {path}: {source}")]
    Archive {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: zip::result::ZipError,
    },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    /// Wrap an I/O error with context
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingDataset(_) => 2,
            Self::PatientUpload { .. } | Self::MissingPatientId(_) => 3,
            Self::Consents { .. } => 4,
            Self::ImportPage { .. } => 5,
            Self::MissingFormToken => 6,
            Self::XarUpload { .. } => 7,
            Self::XarImport(_) => 8,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_upload_steps() {
        let cases = [
            (LoadError::MissingDataset(PathBuf::from("datasets/x")), 2),
            (
                LoadError::PatientUpload {
                    file: "P1.json".into(),
                    status: 500,
                },
                3,
            ),
            (
                LoadError::Consents {
                    patient: "P0000001".into(),
                    status: 403,
                },
                4,
            ),
            (
                LoadError::ImportPage {
                    url: "http://h/import".into(),
                    status: 401,
                },
                5,
            ),
            (LoadError::MissingFormToken, 6),
            (
                LoadError::XarUpload {
                    file: PathBuf::from("dataset.xar"),
                    status: 500,
                },
                7,
            ),
            (LoadError::XarImport(500), 8),
            (LoadError::io("x", std::io::Error::other("boom")), 1),
        ];

        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{error}");
        }
    }
}
