//! HTTP entry point descriptor: a REST API proxying routes to one function.

use serde_json::{Value, json};

use crate::graph::{Construct, ConstructKind, Output};
use crate::lambda::invoke_permission;
use crate::{CfnResource, ConstructPath, Error, LogicalId, Pseudo, Result, Token};

pub const ALL_METHODS: [&str; 7] = ["OPTIONS", "GET", "PUT", "POST", "DELETE", "PATCH", "HEAD"];
pub const ALL_ORIGINS: [&str; 1] = ["*"];

/// CORS preflight settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsOptions {
    pub allow_headers: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_origins: Vec<String>,
}

impl CorsOptions {
    /// Everything allowed from everywhere.
    pub fn permissive() -> Self {
        Self {
            allow_headers: vec!["*".to_string()],
            allow_methods: ALL_METHODS.iter().map(|m| m.to_string()).collect(),
            allow_origins: ALL_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn header_values(&self) -> Vec<(&'static str, String)> {
        let origin = self
            .allow_origins
            .first()
            .map(String::as_str)
            .unwrap_or("*");
        let mut headers = vec![
            (
                "Access-Control-Allow-Headers",
                format!("'{}'", self.allow_headers.join(",")),
            ),
            ("Access-Control-Allow-Origin", format!("'{origin}'")),
        ];
        if origin != "*" {
            headers.push(("Vary", "'Origin'".to_string()));
        }
        headers.push((
            "Access-Control-Allow-Methods",
            format!("'{}'", self.allow_methods.join(",")),
        ));
        headers
    }
}

/// One path segment under the API root and the methods it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path_part: String,
    pub methods: Vec<String>,
}

/// A REST API whose methods integrate with a single function (`AWS_PROXY`).
#[derive(Debug, Clone, PartialEq)]
pub struct RestApi {
    pub path: ConstructPath,
    pub name: String,
    pub handler_arn: Token,
    pub cors: Option<CorsOptions>,
    pub routes: Vec<Route>,
    pub stage_name: String,
}

impl RestApi {
    pub fn new(id: &str, handler_arn: Token) -> Self {
        Self {
            path: ConstructPath::root(id),
            name: id.to_string(),
            handler_arn,
            cors: None,
            routes: Vec::new(),
            stage_name: "prod".to_string(),
        }
    }

    pub fn with_cors(mut self, cors: CorsOptions) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Add `methods` on `/<path_part>`; repeated calls for one path merge.
    pub fn with_route<I, S>(mut self, path_part: &str, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let methods: Vec<String> = methods.into_iter().map(|m| m.into().to_uppercase()).collect();
        match self.routes.iter_mut().find(|r| r.path_part == path_part) {
            Some(route) => {
                for m in methods {
                    if !route.methods.contains(&m) {
                        route.methods.push(m);
                    }
                }
            }
            None => self.routes.push(Route {
                path_part: path_part.to_string(),
                methods,
            }),
        }
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    fn root_path(&self) -> ConstructPath {
        self.path.child("Default")
    }

    fn stage_path(&self) -> ConstructPath {
        self.path
            .child(format!("DeploymentStage.{}", self.stage_name))
            .resource()
    }

    /// Logical id of the deployment stage.
    pub fn stage_id(&self) -> LogicalId {
        self.stage_path().logical_id()
    }

    /// Public invoke URL of the deployment stage.
    pub fn url(&self) -> Token {
        Token::concat(vec![
            Token::literal("https://"),
            Token::Ref(self.logical_id()),
            Token::literal(".execute-api."),
            Token::Pseudo(Pseudo::Region),
            Token::literal("."),
            Token::Pseudo(Pseudo::UrlSuffix),
            Token::literal("/"),
            Token::Ref(self.stage_id()),
            Token::literal("/"),
        ])
    }

    fn execute_api_arn(&self, stage: Token, method: &str, path: &str) -> Token {
        Token::arn(
            "execute-api",
            vec![
                Token::Ref(self.logical_id()),
                Token::literal("/"),
                stage,
                Token::Literal(format!("/{method}{path}")),
            ],
            true,
        )
    }

    fn integration_uri(&self) -> Token {
        Token::concat(vec![
            Token::literal("arn:"),
            Token::Pseudo(Pseudo::Partition),
            Token::literal(":apigateway:"),
            Token::Pseudo(Pseudo::Region),
            Token::literal(":lambda:path/2015-03-31/functions/"),
            self.handler_arn.clone(),
            Token::literal("/invocations"),
        ])
    }

    fn preflight_method(&self, cors: &CorsOptions, path: ConstructPath, resource_id: Token) -> CfnResource {
        let headers = cors.header_values();
        let response_parameters: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(name, value)| (format!("method.response.header.{name}"), json!(value)))
            .collect();
        let method_parameters: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(name, _)| (format!("method.response.header.{name}"), json!(true)))
            .collect();

        CfnResource::new(
            path.child("OPTIONS").resource(),
            "AWS::ApiGateway::Method",
            json!({
                "ApiKeyRequired": false,
                "AuthorizationType": "NONE",
                "HttpMethod": "OPTIONS",
                "Integration": {
                    "IntegrationResponses": [{
                        "ResponseParameters": response_parameters,
                        "StatusCode": "204",
                    }],
                    "RequestTemplates": {"application/json": "{ statusCode: 200 }"},
                    "Type": "MOCK",
                },
                "MethodResponses": [{
                    "ResponseParameters": method_parameters,
                    "StatusCode": "204",
                }],
                "ResourceId": resource_id,
                "RestApiId": Token::Ref(self.logical_id()),
            }),
        )
    }

    fn proxy_method(&self, route_path: &ConstructPath, route: &Route, method: &str, resource_id: Token) -> Vec<CfnResource> {
        let method_path = route_path.child(method);
        let api_path = format!("/{}", route.path_part);

        let method_resource = CfnResource::new(
            method_path.resource(),
            "AWS::ApiGateway::Method",
            json!({
                "AuthorizationType": "NONE",
                "HttpMethod": method,
                "Integration": {
                    "IntegrationHttpMethod": "POST",
                    "Type": "AWS_PROXY",
                    "Uri": self.integration_uri(),
                },
                "ResourceId": resource_id,
                "RestApiId": Token::Ref(self.logical_id()),
            }),
        );

        let stage_permission = invoke_permission(
            method_path.child(format!("ApiPermission.{method}..{}", route.path_part)),
            self.handler_arn.clone(),
            "apigateway.amazonaws.com",
            self.execute_api_arn(Token::Ref(self.stage_id()), method, &api_path),
        );
        let test_permission = invoke_permission(
            method_path.child(format!("ApiPermission.Test.{method}..{}", route.path_part)),
            self.handler_arn.clone(),
            "apigateway.amazonaws.com",
            self.execute_api_arn(Token::literal("test-invoke-stage"), method, &api_path),
        );

        vec![stage_permission, test_permission, method_resource]
    }

    fn render_resources(&self) -> Vec<CfnResource> {
        let api_id = self.logical_id();
        let root_path = self.root_path();
        let root_resource_id = Token::get_att(&api_id, "RootResourceId");

        let mut resources = vec![CfnResource::new(
            self.path.resource(),
            "AWS::ApiGateway::RestApi",
            json!({ "Name": self.name }),
        )];
        // methods and path resources the deployment must wait for
        let mut api_members = Vec::new();

        if let Some(cors) = &self.cors {
            let options = self.preflight_method(cors, root_path.clone(), root_resource_id.clone());
            api_members.push(options.clone());
            resources.push(options);
        }

        for route in &self.routes {
            let route_path = root_path.child(route.path_part.clone());
            let route_resource = CfnResource::new(
                route_path.resource(),
                "AWS::ApiGateway::Resource",
                json!({
                    "ParentId": root_resource_id,
                    "PathPart": route.path_part,
                    "RestApiId": Token::Ref(api_id.clone()),
                }),
            );
            let route_id = Token::Ref(route_resource.logical_id.clone());
            api_members.push(route_resource.clone());
            resources.push(route_resource);

            if let Some(cors) = &self.cors {
                let options = self.preflight_method(cors, route_path.clone(), route_id.clone());
                api_members.push(options.clone());
                resources.push(options);
            }

            for method in &route.methods {
                let rendered = self.proxy_method(&route_path, route, method, route_id.clone());
                if let Some(method_resource) = rendered.last() {
                    api_members.push(method_resource.clone());
                }
                resources.extend(rendered);
            }
        }

        // A new deployment id whenever the routing tree changes forces a redeploy.
        let fingerprint: Vec<(&str, &Value)> = api_members
            .iter()
            .map(|r| (r.logical_id.as_str(), &r.properties))
            .collect();
        let content_hash = format!("{:x}", md5::compute(json!(fingerprint).to_string()));
        let deployment_path = self.path.child("Deployment").resource();
        let deployment_id = LogicalId::new(format!(
            "{}{}",
            deployment_path.logical_id(),
            content_hash
        ));

        let mut deployment = CfnResource::new(
            deployment_path,
            "AWS::ApiGateway::Deployment",
            json!({
                "Description": "Automatically created by the RestApi construct",
                "RestApiId": Token::Ref(api_id.clone()),
            }),
        )
        .with_logical_id(deployment_id.clone());
        for member in &api_members {
            deployment = deployment.depends_on(member.logical_id.clone());
        }
        resources.push(deployment);

        resources.push(CfnResource::new(
            self.stage_path(),
            "AWS::ApiGateway::Stage",
            json!({
                "DeploymentId": Token::Ref(deployment_id),
                "RestApiId": Token::Ref(api_id),
                "StageName": self.stage_name,
            }),
        ));

        resources
    }
}

impl Construct for RestApi {
    fn kind(&self) -> ConstructKind {
        ConstructKind::RestApi
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        if let Some(cors) = &self.cors {
            if cors.allow_origins.len() > 1 {
                // A preflight response carries exactly one allowed origin.
                return Err(Error::InvalidInput(format!(
                    "{}: CORS allows a single origin, got {}",
                    self.path,
                    cors.allow_origins.join(", ")
                )));
            }
        }
        Ok(self.render_resources())
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output {
            logical_id: self.path.child("Endpoint").logical_id(),
            value: self.url(),
            description: Some(format!("Invoke URL of the {} API", self.name)),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> RestApi {
        RestApi::new("updateApi", Token::get_att(&LogicalId::new("Fn1"), "Arn"))
            .with_cors(CorsOptions::permissive())
            .with_route("post", ["post"])
    }

    fn methods(resources: &[CfnResource]) -> Vec<(String, String)> {
        resources
            .iter()
            .filter(|r| r.resource_type == "AWS::ApiGateway::Method")
            .map(|r| {
                (
                    r.path.to_string(),
                    r.property("/HttpMethod").and_then(Value::as_str).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_post_route_with_preflight() {
        let resources = api().render().unwrap();
        let methods = methods(&resources);
        assert_eq!(
            methods,
            vec![
                ("updateApi/Default/OPTIONS/Resource".to_string(), "OPTIONS".to_string()),
                ("updateApi/Default/post/OPTIONS/Resource".to_string(), "OPTIONS".to_string()),
                ("updateApi/Default/post/POST/Resource".to_string(), "POST".to_string()),
            ]
        );

        let post = resources
            .iter()
            .find(|r| r.path.to_string() == "updateApi/Default/post/POST/Resource")
            .unwrap();
        assert_eq!(post.property("/Integration/Type"), Some(&json!("AWS_PROXY")));
        assert!(post.references().contains("Fn1"));

        let permissions = resources
            .iter()
            .filter(|r| r.resource_type == "AWS::Lambda::Permission")
            .count();
        assert_eq!(permissions, 2);
    }

    #[test]
    fn test_cors_headers() {
        let resources = api().render().unwrap();
        let options = resources
            .iter()
            .find(|r| r.path.to_string() == "updateApi/Default/OPTIONS/Resource")
            .unwrap();
        let params = options
            .property("/Integration/IntegrationResponses/0/ResponseParameters")
            .unwrap();
        assert_eq!(
            params["method.response.header.Access-Control-Allow-Methods"],
            json!("'OPTIONS,GET,PUT,POST,DELETE,PATCH,HEAD'")
        );
        assert_eq!(params["method.response.header.Access-Control-Allow-Origin"], json!("'*'"));
        assert!(params.get("method.response.header.Vary").is_none());
    }

    #[test]
    fn test_several_origins_rejected() {
        let cors = CorsOptions {
            allow_origins: vec!["https://a.example".to_string(), "https://b.example".to_string()],
            ..CorsOptions::permissive()
        };
        let api = RestApi::new("updateApi", Token::get_att(&LogicalId::new("Fn1"), "Arn"))
            .with_cors(cors)
            .with_route("post", ["POST"]);
        assert!(matches!(api.render(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_deployment_id_tracks_routes() {
        let deployment_id = |api: &RestApi| {
            api.render()
                .unwrap()
                .into_iter()
                .find(|r| r.resource_type == "AWS::ApiGateway::Deployment")
                .unwrap()
                .logical_id
        };
        assert_eq!(deployment_id(&api()), deployment_id(&api()));
        assert_ne!(deployment_id(&api()), deployment_id(&api().with_route("post", ["GET"])));
    }

    #[test]
    fn test_stage_and_output() {
        let api = api();
        let resources = api.render().unwrap();
        let stage = resources
            .iter()
            .find(|r| r.resource_type == "AWS::ApiGateway::Stage")
            .unwrap();
        assert_eq!(stage.logical_id, api.stage_id());
        assert_eq!(stage.property("/StageName"), Some(&json!("prod")));

        let outputs = api.outputs();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].logical_id.as_str().starts_with("updateApiEndpoint"));
    }
}
