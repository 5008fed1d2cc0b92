//! Turns raw admission review bodies into responses.
use gcp_auth_inject::{
    k8s::{pods::PodMutator, service_accounts::ServiceAccountMutator},
    Error,
};
use json_patch::Patch;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject, TypeMeta,
};
use warp::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};

const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
const ADMISSION_KIND: &str = "AdmissionReview";

/// The kind of object an endpoint admits. Chosen by the route, never by the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewKind {
    Pod,
    ServiceAccount,
}

impl ReviewKind {
    fn object(self) -> &'static str {
        match self {
            ReviewKind::Pod => "pod",
            ReviewKind::ServiceAccount => "service account",
        }
    }
}

/// An HTTP reply ready to be written back to the API server.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body,
        }
    }

    fn error(status: StatusCode, err: &Error) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: err.to_string().into_bytes(),
        }
    }
}

impl warp::Reply for Reply {
    fn into_response(self) -> warp::reply::Response {
        let mut response = warp::reply::Response::new(self.body.into());
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

pub struct ReviewDispatcher {
    pods: PodMutator,
    service_accounts: ServiceAccountMutator,
}

impl ReviewDispatcher {
    pub fn new(pods: PodMutator, service_accounts: ServiceAccountMutator) -> Self {
        Self {
            pods,
            service_accounts,
        }
    }

    /// Handle one admission review body.
    ///
    /// Only an empty body and an unencodable response are reported at the HTTP level;
    /// everything else is a denied admission response.
    pub fn handle(&self, kind: ReviewKind, body: &[u8]) -> Reply {
        if body.is_empty() {
            tracing::warn!("request body was empty, returning");
            return Reply::error(StatusCode::BAD_REQUEST, &Error::EmptyBody);
        }

        match encode(self.respond(kind, body)) {
            Ok(body) => Reply::json(body),
            Err(err) => {
                tracing::error!("Can't encode response: {}", err);
                Reply::error(StatusCode::INTERNAL_SERVER_ERROR, &err)
            }
        }
    }

    fn respond(&self, kind: ReviewKind, body: &[u8]) -> AdmissionResponse {
        let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(err) => {
                let err = Error::decode("admission review", err);
                tracing::error!("Can't decode body: {}", err);
                return AdmissionResponse::invalid(err);
            }
        };
        tracing::trace!("Admission Handler request {:?}", review);

        let req: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(req) => req,
            Err(err) => {
                let err = Error::decode("admission review", err);
                tracing::error!("invalid admission request: {}", err);
                return AdmissionResponse::invalid(err);
            }
        };

        match self.mutate(kind, &req) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("denied {} {:?}: {}", kind.object(), req.name, err);
                AdmissionResponse::from(&req).deny(err)
            }
        }
    }

    fn mutate(
        &self,
        kind: ReviewKind,
        req: &AdmissionRequest<DynamicObject>,
    ) -> Result<AdmissionResponse, Error> {
        let object = req
            .object
            .clone()
            .ok_or_else(|| Error::decode(kind.object(), "no object in request"))?;

        let patches = match kind {
            ReviewKind::Pod => {
                let mut pod: Pod = object
                    .try_parse()
                    .map_err(|err| Error::decode("pod", err))?;
                if pod.metadata.namespace.is_none() {
                    pod.metadata.namespace = req.namespace.clone();
                }
                self.pods.mutate(&pod)?
            }
            ReviewKind::ServiceAccount => {
                let mut sa: ServiceAccount = object
                    .try_parse()
                    .map_err(|err| Error::decode("service account", err))?;
                if sa.metadata.namespace.is_none() {
                    sa.metadata.namespace = req.namespace.clone();
                }
                self.service_accounts.mutate(&sa)?
            }
        };

        let response = AdmissionResponse::from(req);
        if patches.is_empty() {
            tracing::debug!("Nothing to inject into {} {:?}", kind.object(), req.name);
            return Ok(response);
        }

        tracing::info!(
            "Mutating {} {:?} in namespace={:?} with {} patches",
            kind.object(),
            req.name,
            req.namespace,
            patches.len()
        );
        Ok(response.with_patch(Patch(patches))?)
    }
}

fn encode(mut response: AdmissionResponse) -> Result<Vec<u8>, Error> {
    response.types = TypeMeta {
        api_version: ADMISSION_API_VERSION.to_string(),
        kind: ADMISSION_KIND.to_string(),
    };
    let review = response.into_review();
    tracing::trace!("Admission response: {:?}", review);
    serde_json::to_vec(&review).map_err(Error::Encode)
}
