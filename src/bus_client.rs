use crate::{
    error::BusError,
    http_client::{base_url, handle_http_response, transport_error},
    path::BusPath,
    session_client::{Credentials, Session},
};
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, Method, RequestBuilder, header::AUTHORIZATION};
use serde::Serialize;
use serde_json::{Map, Value};
use trait_variant::make;

/// Named parameters of a set/add request or the arguments of a command
pub type Params = Map<String, Value>;

/// Path-based access to the device's management bus
///
/// Every call reflects the current remote state; nothing is cached.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait BusClient {
    /// Read an object listing or, for a parameter path, the parameter value
    async fn get(&self, path: &BusPath) -> Result<Value, BusError>;
    async fn set(&self, path: &BusPath, params: &Params) -> Result<(), BusError>;
    /// Create a new instance below `path` and return the created object's path
    async fn add(&self, path: &BusPath, params: &Params) -> Result<BusPath, BusError>;
    /// Call a data-model command such as `Device.WiFi.DataElements.Network.ClientSteering`
    async fn invoke(&self, path: &BusPath, args: &Params) -> Result<Value, BusError>;
}

#[derive(Clone, Debug, Default)]
pub enum BusAuth {
    #[default]
    None,
    Basic(Credentials),
    Bearer(Session),
}

#[derive(Serialize)]
struct ParametersBody<'a> {
    parameters: &'a Params,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody<'a> {
    sendresp: bool,
    command_key: &'a str,
    command: &'a str,
    input_args: &'a Params,
}

/// Bus client for the device's HTTP proxy of the data model
#[derive(Clone)]
pub struct HttpBusClient {
    client: Client,
    base_url: String,
    auth: BusAuth,
}

impl HttpBusClient {
    const SERVICE_ELEMENTS_ENDPOINT: &str = "/serviceElements/";
    const COMMANDS_ENDPOINT: &str = "/commands";

    pub fn new(client: Client, url: &str, auth: BusAuth) -> Self {
        Self {
            client,
            base_url: base_url(url),
            auth,
        }
    }

    pub fn set_auth(&mut self, auth: BusAuth) {
        self.auth = auth;
    }

    fn build_url(&self, path: &BusPath) -> String {
        format!(
            "{}{}{}",
            self.base_url,
            Self::SERVICE_ELEMENTS_ENDPOINT,
            path.as_str().trim_start_matches('.')
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            BusAuth::None => builder,
            BusAuth::Basic(credentials) => {
                builder.basic_auth(&credentials.username, Some(&credentials.password))
            }
            BusAuth::Bearer(session) => builder.header(AUTHORIZATION, session.authorization()),
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        path: &BusPath,
        context_msg: &str,
    ) -> Result<String, BusError> {
        let res = builder
            .send()
            .await
            .map_err(|e| transport_error(e, context_msg))?;

        handle_http_response(res, path, context_msg).await
    }
}

impl BusClient for HttpBusClient {
    async fn get(&self, path: &BusPath) -> Result<Value, BusError> {
        let url = self.build_url(path);
        info!("GET {url}");

        let body = self
            .send(self.request(Method::GET, &url), path, &format!("GET {url}"))
            .await?;

        parse_get_response(path, &body)
    }

    async fn set(&self, path: &BusPath, params: &Params) -> Result<(), BusError> {
        let url = self.build_url(path);
        info!("PUT {url}");
        debug!("PUT {url} with parameters: {params:?}");

        self.send(
            self.request(Method::PUT, &url)
                .json(&ParametersBody { parameters: params }),
            path,
            &format!("PUT {url}"),
        )
        .await?;

        Ok(())
    }

    async fn add(&self, path: &BusPath, params: &Params) -> Result<BusPath, BusError> {
        let url = self.build_url(path);
        info!("POST {url}");
        debug!("POST {url} with parameters: {params:?}");

        let body = self
            .send(
                self.request(Method::POST, &url)
                    .json(&ParametersBody { parameters: params }),
                path,
                &format!("POST {url}"),
            )
            .await?;

        let created = parse_add_response(&body)?;
        info!("created {created}");
        Ok(created)
    }

    async fn invoke(&self, path: &BusPath, args: &Params) -> Result<Value, BusError> {
        let url = format!("{}{}", self.base_url, Self::COMMANDS_ENDPOINT);
        info!("POST {url} command {path}");
        debug!("command {path} with arguments: {args:?}");

        let body = self
            .send(
                self.request(Method::POST, &url).json(&CommandBody {
                    sendresp: true,
                    command_key: "",
                    command: path.as_str(),
                    input_args: args,
                }),
                path,
                &format!("POST {url}"),
            )
            .await?;

        parse_json_or_null(&body)
    }
}

fn parse_json_or_null(body: &str) -> Result<Value, BusError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| BusError::Rpc(format!("malformed response: {e}")))
}

/// The proxy answers with a listing `[{"path": ..., "parameters": {...}}, ...]`.
/// For a parameter path the matching parameter value is extracted.
fn parse_get_response(path: &BusPath, body: &str) -> Result<Value, BusError> {
    let value = parse_json_or_null(body)?;

    let Value::Array(entries) = &value else {
        return Ok(value);
    };

    if entries.is_empty() {
        return Err(BusError::NotFound(path.clone()));
    }

    let Some(leaf) = path.leaf() else {
        return Ok(value);
    };

    let listed_parameters = entries
        .iter()
        .filter_map(|entry| entry.get("parameters"))
        .collect::<Vec<_>>();

    // not a listing; hand back as-is
    if listed_parameters.is_empty() {
        return Ok(value);
    }

    listed_parameters
        .into_iter()
        .find_map(|parameters| parameters.get(leaf))
        .cloned()
        .ok_or_else(|| BusError::NotFound(path.clone()))
}

fn parse_add_response(body: &str) -> Result<BusPath, BusError> {
    let value = parse_json_or_null(body)?;

    let entry = match &value {
        Value::Array(entries) => entries.first(),
        Value::Object(_) => Some(&value),
        _ => None,
    };

    entry
        .and_then(|entry| entry.get("path"))
        .and_then(Value::as_str)
        .map(BusPath::from)
        .ok_or_else(|| BusError::Rpc(format!("add response does not contain a path: {body}")))
}
