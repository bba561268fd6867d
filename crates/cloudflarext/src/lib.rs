use cloudflare::framework::{
    auth::{AuthClient, Credentials},
    endpoint::Endpoint,
    response::{ApiErrors, ApiFailure, ApiResponse, ApiResult, ApiSuccess},
    Environment, Error, HttpApiClientConfig,
};
use url::Url;

pub mod cfd_tunnel;

/// Environment for an api base url override. Endpoint paths are joined onto
/// the base, so a missing trailing slash would silently drop its last segment.
pub fn custom_environment(mut base: Url) -> Result<Environment, url::ParseError> {
    if base.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    Ok(Environment::Custom(base))
}

/// Cloudflare client that takes credentials per request, so one client serves
/// every account the operator manages.
pub struct AuthlessClient {
    environment: Environment,
    http_client: reqwest::Client,
}

impl AuthlessClient {
    pub fn try_new(
        config: HttpApiClientConfig,
        environment: Environment,
    ) -> Result<AuthlessClient, Error> {
        let builder = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .default_headers(config.default_headers);
        let http_client = builder.build()?;
        Ok(AuthlessClient {
            environment,
            http_client,
        })
    }

    pub async fn request<ResultType>(
        &self,
        credentials: &Credentials,
        endpoint: &(dyn Endpoint<ResultType> + Send + Sync),
    ) -> ApiResponse<ResultType>
    where
        ResultType: ApiResult,
    {
        let mut request = self
            .http_client
            .request(endpoint.method(), endpoint.url(&self.environment));

        if let Some(body) = endpoint.body() {
            request = request.body(body).header(
                reqwest::header::CONTENT_TYPE,
                endpoint.content_type().as_ref(),
            );
        }

        let response = request.auth(credentials).send().await?;
        map_api_response(response).await
    }
}

// If the response is 2XX and parses, return Success.
// If the response is 2XX and doesn't parse, return Invalid.
// If the response isn't 2XX, return Failure, with API errors if they were included.
async fn map_api_response<ResultType: ApiResult>(
    resp: reqwest::Response,
) -> ApiResponse<ResultType> {
    let status = resp.status();
    if status.is_success() {
        let parsed: Result<ApiSuccess<ResultType>, reqwest::Error> = resp.json().await;
        match parsed {
            Ok(api_resp) => Ok(api_resp),
            Err(e) => Err(ApiFailure::Invalid(e)),
        }
    } else {
        let parsed: Result<ApiErrors, reqwest::Error> = resp.json().await;
        let errors = parsed.unwrap_or_default();
        Err(ApiFailure::Error(status, errors))
    }
}
