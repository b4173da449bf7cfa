//! Dataset upload
//!
//! Order matters: XAR pages carry fixed patient ids, so they are imported
//! before REST-created patients, and the index is rebuilt last because XAR
//! imports bypass it.

use crate::client::InstanceClient;
use crate::config::LoaderSettings;
use crate::dataset::patient_files;
use crate::error::LoadError;
use crate::xar::{self, XAR_IMPORT_URL, XAR_REDIRECT, XAR_UPLOAD_URL};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Patient creation endpoint
pub const PATIENTS_URL: &str = "/rest/patients";
/// Patient reindex endpoint
pub const REINDEX_URL: &str = "/rest/patients/reindex";

/// What an upload did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Pages imported from the XAR
    pub xar_pages: Vec<String>,
    /// Ids of the created patients
    pub patients: Vec<String>,
    /// Patient files skipped for not holding valid JSON
    pub invalid_files: Vec<PathBuf>,
    /// Whether the reindex request succeeded
    pub reindexed: bool,
}

/// Uploads datasets to one instance
#[derive(Debug, Clone)]
pub struct DatasetUploader {
    client: InstanceClient,
    settings: LoaderSettings,
}

impl DatasetUploader {
    /// Uploader using `client` and `settings`
    #[must_use]
    pub fn new(client: InstanceClient, settings: LoaderSettings) -> Self {
        Self { client, settings }
    }

    /// Upload the dataset named `dataset`.
    ///
    /// # Errors
    /// Each step has its own [`LoadError`] variant (and exit code); a failed
    /// reindex is only logged.
    pub async fn upload(&self, dataset: &str) -> Result<UploadReport, LoadError> {
        tracing::info!(
            "Starting uploading data {} to server {}",
            dataset,
            self.client.address()
        );

        let folder = self.settings.datasets_dir.join(dataset);
        if !folder.is_dir() {
            tracing::error!("Error: dataset folder {} does not exist", folder.display());
            return Err(LoadError::MissingDataset(folder));
        }

        let status = self.client.check_reachable().await?;
        tracing::debug!("Instance answered {}", status);

        let xar_pages = self.upload_xar(&folder).await?;
        let (patients, invalid_files) = self.upload_patients(&folder).await?;
        let reindexed = self.reindex().await;

        tracing::info!(
            "Finished uploading data {} to server {}",
            dataset,
            self.client.address()
        );
        Ok(UploadReport {
            xar_pages,
            patients,
            invalid_files,
            reindexed,
        })
    }

    async fn upload_xar(&self, folder: &Path) -> Result<Vec<String>, LoadError> {
        let xar_name = &self.settings.xar_file;
        let path = folder.join(xar_name);
        if !path.is_file() {
            tracing::info!("Skipping XAR upload: file {} is not included in the dataset", xar_name);
            return Ok(Vec::new());
        }
        tracing::info!("Uploading XAR {} to the server...", path.display());

        let (status, page) = self.client.get(XAR_IMPORT_URL).await?;
        if status != StatusCode::OK {
            return Err(LoadError::ImportPage {
                url: self.client.address().url(XAR_IMPORT_URL),
                status: status.as_u16(),
            });
        }
        let token = xar::form_token(&page).ok_or(LoadError::MissingFormToken)?;
        tracing::info!("* form token: {}", token);

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LoadError::io(format!("reading {}", path.display()), e))?;
        let form = Form::new()
            .part("filepath", Part::bytes(bytes).file_name(xar_name.clone()))
            .text("xredirect", XAR_REDIRECT)
            .text("form_token", token);

        let status = self.client.post_multipart(XAR_UPLOAD_URL, form).await?;
        if !matches!(status.as_u16(), 200 | 201 | 302) {
            return Err(LoadError::XarUpload {
                file: path,
                status: status.as_u16(),
            });
        }
        tracing::info!("* uploaded xar file: {}", path.display());

        tracing::info!("Importing documents from an uploaded XAR file...");
        let pages = xar::page_names(&path)?;
        let query = xar::import_query(xar_name, &pages);
        let status = self.client.post_form(&format!("{XAR_IMPORT_URL}{query}")).await?;
        if !status.is_success() {
            return Err(LoadError::XarImport(status.as_u16()));
        }

        tracing::info!("Imported {} XWiki documents from XAR file", pages.len());
        Ok(pages)
    }

    async fn upload_patients(&self, folder: &Path) -> Result<(Vec<String>, Vec<PathBuf>), LoadError> {
        tracing::info!("Searching for JSON files to be uploaded...");
        let files = patient_files(folder)?;
        if files.is_empty() {
            tracing::info!("* no JSON files found");
        }

        let mut created = Vec::with_capacity(files.len());
        let mut invalid = Vec::new();

        for path in files {
            tracing::info!("Found Patient JSON file {}", path.display());
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| LoadError::io(format!("reading {}", path.display()), e))?;

            let Ok(record) = serde_json::from_str::<Value>(&text) else {
                tracing::error!("* [ERROR] file {} does not contain valid JSON data", path.display());
                invalid.push(path);
                continue;
            };

            let response = self.client.post_json(PATIENTS_URL, &record).await?;
            let file = path.display().to_string();
            if !response.status().is_success() {
                return Err(LoadError::PatientUpload {
                    file,
                    status: response.status().as_u16(),
                });
            }

            let id = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(patient_id)
                .ok_or(LoadError::MissingPatientId(file))?;
            tracing::info!("* created new patient, id: {}", id);

            self.grant_consents(&id).await?;
            created.push(id);
        }

        if !created.is_empty() {
            tracing::info!("->Finished loading {} patients", created.len());
        }
        Ok((created, invalid))
    }

    async fn grant_consents(&self, patient: &str) -> Result<(), LoadError> {
        let resource = format!("{PATIENTS_URL}/{patient}/consents/assign");
        tracing::info!("* updating patient consents using URL {}", self.client.address().url(&resource));

        let consents = serde_json::to_value(&self.settings.consents)?;
        let status = self.client.put_json(&resource, &consents).await?;
        if !status.is_success() {
            return Err(LoadError::Consents {
                patient: patient.to_string(),
                status: status.as_u16(),
            });
        }

        tracing::info!("* granted consents {:?}", self.settings.consents);
        Ok(())
    }

    async fn reindex(&self) -> bool {
        tracing::info!("Reindexing patients...");
        match self.client.get(REINDEX_URL).await {
            Ok((status, _)) if status.is_success() => {
                tracing::info!("Reindexed patients successfully");
                true
            }
            Ok((status, _)) => {
                tracing::error!("Error during reindexing patients {}", status);
                false
            }
            Err(e) => {
                tracing::error!("Error during reindexing patients: {}", e);
                false
            }
        }
    }
}

/// Last path segment of a `Location` header
fn patient_id(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
