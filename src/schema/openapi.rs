//! OpenAPI 3.1 document of the generated resource API.

use super::{FieldKind, FieldSchema, FilterSchema, ObjectSchema, ResourceSchemas};
use crate::config::Catalog;
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::openapi::path::{HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, ParameterStyle, PathItemBuilder};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::schema::{Array, KnownFormat, ObjectBuilder, SchemaFormat, SchemaType, Type};
use utoipa::openapi::{
    header::HeaderBuilder, ComponentsBuilder, ContentBuilder, InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder,
    Ref, RefOr, Required, Response, ResponseBuilder, Schema,
};

const JSON: &str = "application/json";

fn typed(ty: Type, nullable: bool) -> SchemaType {
    if nullable {
        SchemaType::from_iter([ty, Type::Null])
    } else {
        SchemaType::Type(ty)
    }
}

fn scalar(kind: &FieldKind, nullable: bool) -> Option<ObjectBuilder> {
    let (ty, format) = match kind {
        FieldKind::Integer => (Type::Integer, Some(KnownFormat::Int64)),
        FieldKind::Number => (Type::Number, Some(KnownFormat::Double)),
        FieldKind::Boolean => (Type::Boolean, None),
        FieldKind::String | FieldKind::Enum(_) => (Type::String, None),
        FieldKind::Date => (Type::String, Some(KnownFormat::Date)),
        FieldKind::DateTime => (Type::String, Some(KnownFormat::DateTime)),
        FieldKind::Uuid => (Type::String, Some(KnownFormat::Uuid)),
        FieldKind::Json | FieldKind::Array(_) => return None,
    };
    let mut builder = ObjectBuilder::new()
        .schema_type(typed(ty, nullable))
        .format(format.map(SchemaFormat::KnownFormat));
    if let FieldKind::Enum(values) = kind {
        builder = builder.enum_values(Some(values.clone()));
    }
    Some(builder)
}

fn kind_schema(kind: &FieldKind, nullable: bool) -> RefOr<Schema> {
    match (scalar(kind, nullable), kind) {
        (Some(builder), _) => RefOr::T(Schema::Object(builder.build())),
        (None, FieldKind::Array(items)) => RefOr::T(Schema::Array(Array::new(kind_schema(items, false)))),
        (None, _) => RefOr::T(Schema::Object(ObjectBuilder::new().schema_type(SchemaType::AnyValue).build())),
    }
}

fn field_schema(field: &FieldSchema) -> RefOr<Schema> {
    let Some(mut builder) = scalar(&field.kind, field.nullable) else {
        return kind_schema(&field.kind, field.nullable);
    };
    if field.read_only {
        builder = builder.read_only(Some(true));
    }
    if let Some(target) = &field.reference {
        builder = builder.description(Some(format!("References `{}`", target)));
    }
    let rule = &field.rule;
    if let Some(format) = &rule.format {
        builder = builder.format(Some(SchemaFormat::Custom(format.clone())));
    }
    if !rule.one_of.is_empty() {
        builder = builder.enum_values(Some(rule.one_of.clone()));
    }
    builder = builder
        .min_length(rule.min_length.map(|n| n as usize))
        .max_length(rule.max_length.map(|n| n as usize))
        .pattern(rule.pattern.clone())
        .minimum(rule.minimum)
        .maximum(rule.maximum);
    RefOr::T(Schema::Object(builder.build()))
}

fn object_schema(schema: &ObjectSchema) -> RefOr<Schema> {
    let mut builder = ObjectBuilder::new()
        .schema_type(Type::Object)
        .title(Some(schema.name.clone()));
    for field in &schema.fields {
        builder = builder.property(field.name.clone(), field_schema(field));
        if field.required {
            builder = builder.required(field.name.clone());
        }
    }
    RefOr::T(Schema::Object(builder.build()))
}

fn filter_schema(filter: &FilterSchema) -> RefOr<Schema> {
    let mut builder = ObjectBuilder::new()
        .schema_type(Type::Object)
        .title(Some(filter.name.clone()));
    for key in &filter.keys {
        builder = builder.property(key.key.clone(), kind_schema(&key.kind, false));
    }
    if let Some(target) = &filter.q_target {
        let q = ObjectBuilder::new()
            .schema_type(Type::String)
            .description(Some(format!("Free-text search on `{}`", target)));
        builder = builder.property("q", RefOr::T(Schema::Object(q.build())));
    }
    RefOr::T(Schema::Object(builder.build()))
}

fn reference(name: &str) -> RefOr<Schema> {
    RefOr::Ref(Ref::from_schema_name(name))
}

fn array_of(items: RefOr<Schema>) -> RefOr<Schema> {
    RefOr::T(Schema::Array(Array::new(items)))
}

fn json_response(description: &str, schema: RefOr<Schema>) -> ResponseBuilder {
    ResponseBuilder::new()
        .description(description)
        .content(JSON, ContentBuilder::new().schema(Some(schema)).build())
}

fn error_response(description: &str) -> Response {
    ResponseBuilder::new().description(description).build()
}

fn query_param(name: &str, schema: RefOr<Schema>) -> ParameterBuilder {
    ParameterBuilder::new()
        .name(name)
        .parameter_in(ParameterIn::Query)
        .required(Required::False)
        .schema(Some(schema))
}

fn ids_param() -> ParameterBuilder {
    ParameterBuilder::new()
        .name("ids")
        .parameter_in(ParameterIn::Path)
        .required(Required::True)
        .description(Some("Comma-joined id tokens"))
        .schema(Some(kind_schema(&FieldKind::String, false)))
}

fn operation(resource: &str, id: &str, summary: String) -> OperationBuilder {
    OperationBuilder::new()
        .tags(Some(vec![resource.to_string()]))
        .operation_id(Some(format!("{}_{}", resource, id)))
        .summary(Some(summary))
        .response("401", error_response("Not identified"))
        .response("403", error_response("Forbidden"))
}

fn body(schema_name: &str) -> Option<utoipa::openapi::request_body::RequestBody> {
    Some(
        RequestBodyBuilder::new()
            .content(JSON, ContentBuilder::new().schema(Some(reference(schema_name))).build())
            .required(Some(Required::True))
            .build(),
    )
}

fn add_components(mut components: ComponentsBuilder, schemas: &ResourceSchemas) -> ComponentsBuilder {
    for object in [&schemas.read, &schemas.create, &schemas.update] {
        components = components.schema(object.name.clone(), object_schema(object));
    }
    components.schema(schemas.filter.name.clone(), filter_schema(&schemas.filter))
}

/// Five operations per resource, tagged with the resource name, with one component per
/// synthesized schema.
pub fn document(prefix: &str, catalog: &Catalog, schemas: &HashMap<String, Arc<ResourceSchemas>>) -> OpenApi {
    let prefix = prefix.trim_end_matches('/');
    let mut paths = PathsBuilder::new();
    let mut components = ComponentsBuilder::new();
    for resource in catalog.iter() {
        let Some(s) = schemas.get(&resource.name) else {
            continue;
        };
        let name = resource.name.as_str();
        components = add_components(components, s);
        let ids_result = || json_response("Echoed ids", array_of(kind_schema(&FieldKind::String, false))).build();

        let list = operation(name, "list", format!("List {}", name))
            .parameter(query_param("limit", kind_schema(&FieldKind::Integer, false)))
            .parameter(query_param("offset", kind_schema(&FieldKind::Integer, false)))
            .parameter(query_param("sort[field]", kind_schema(&FieldKind::String, false)))
            .parameter(query_param(
                "sort[order]",
                kind_schema(&FieldKind::Enum(vec!["ASC".into(), "DESC".into()]), false),
            ))
            .parameter(
                query_param("filter", reference(&s.filter.name))
                    .style(Some(ParameterStyle::DeepObject))
                    .explode(Some(true)),
            )
            .response(
                "200",
                json_response("Matching rows", array_of(reference(&s.read.name)))
                    .header(
                        "x-total",
                        HeaderBuilder::new()
                            .schema(kind_schema(&FieldKind::Integer, false))
                            .description(Some("Total matching rows"))
                            .build(),
                    )
                    .build(),
            )
            .response("422", error_response("Invalid query"));
        let upsert = operation(name, "upsert", format!("Create or update {}", name))
            .request_body(body(&s.create.name))
            .response("200", json_response("Stored row", reference(&s.read.name)).build())
            .response("422", error_response("Invalid body"));
        let read = operation(name, "read", format!("Read {} by ids", name))
            .parameter(ids_param())
            .response("200", json_response("Found rows", array_of(reference(&s.read.name))).build());
        let update = operation(name, "update", format!("Update {} by ids", name))
            .parameter(ids_param())
            .request_body(body(&s.update.name))
            .response("200", ids_result())
            .response("422", error_response("Invalid body"));
        let delete = operation(name, "delete", format!("Delete {} by ids", name))
            .parameter(ids_param())
            .response("200", ids_result());

        paths = paths
            .path(
                format!("{}/{}", prefix, name),
                PathItemBuilder::new()
                    .operation(HttpMethod::Get, list.build())
                    .operation(HttpMethod::Put, upsert.build())
                    .build(),
            )
            .path(
                format!("{}/{}/{{ids}}", prefix, name),
                PathItemBuilder::new()
                    .operation(HttpMethod::Get, read.build())
                    .operation(HttpMethod::Patch, update.build())
                    .operation(HttpMethod::Delete, delete.build())
                    .build(),
            );
    }

    OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title(env!("CARGO_PKG_NAME"))
                .version(env!("CARGO_PKG_VERSION"))
                .build(),
        )
        .paths(paths.build())
        .components(Some(components.build()))
        .build()
}
