use docmodel::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Shape)]
struct Address {
    city: String,
    zip_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Shape)]
#[serde(rename_all = "camelCase")]
struct Customer {
    id: String,
    display_name: String,
    #[serde(rename = "home")]
    address: Address,
    tags: Vec<String>,
    #[serde(skip)]
    cached_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Shape)]
struct Audited {
    id: String,
    #[serde(flatten)]
    stamp: Stamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Shape)]
struct Stamp {
    created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Shape)]
struct Envelope<T> {
    id: String,
    body: T,
}

#[test]
fn derives_nested_shape_with_serde_names() {
    let fields = FieldMap::from_shape(&Customer::shape());
    let names = fields.iter().map(Field::name).collect::<Vec<_>>();

    assert_eq!(
        names,
        vec!["id", "displayName", "home", "home.city", "home.zip_code", "tags"]
    );
    assert_eq!(fields.get("home.city").unwrap().alias(), "home_city");
}

#[test]
fn flattened_fields_join_the_parent() {
    let fields = FieldMap::from_shape(&Audited::shape());

    assert!(fields.get("created_by").is_some());
    assert!(fields.get("stamp").is_none());
}

#[test]
fn generic_structs_use_the_parameter_shape() {
    let fields = FieldMap::from_shape(&Envelope::<Address>::shape());

    assert!(fields.get("body.city").is_some());
    assert!(FieldMap::from_shape(&Envelope::<String>::shape()).get("body").unwrap().name() == "body");
}

#[tokio::test]
async fn typed_models_validate_through_serde() {
    let customers = ConnectionCache::new(InMemoryStore::new())
        .model("crm", "customers", None, TypedSchema::<Customer>::new())
        .await
        .unwrap();

    let inserted = customers
        .insert(json!({
            "id": "c1",
            "displayName": "Ada",
            "home": { "city": "London", "zip_code": null },
            "tags": ["vip"],
            "ignored": true
        }))
        .await;
    assert!(inserted.success);
    assert!(inserted.resource.as_ref().unwrap().get("ignored").is_none());

    let city = customers.fields().get("home.city").unwrap();
    let found = customers
        .find_one(FindOneOptions::new().filter(qb().eq(city, "London")))
        .await;
    let customer = found.resource_as::<Customer>().unwrap().unwrap();
    assert_eq!(customer.display_name, "Ada");
    assert_eq!(customer.cached_score, 0);

    let rejected = customers.insert(json!({ "id": "c2", "displayName": 7 })).await;
    assert!(matches!(rejected.error, Some(ModelError::Validation(_))));
}
