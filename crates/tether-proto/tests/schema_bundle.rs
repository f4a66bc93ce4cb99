//! Schema loader validation against hand-built bundles.

mod common;

use tether_proto::{FieldKind, Schema, SchemaError};

use common::{
    bundle, chunk_list, person_bundle, record, Entry, FieldSpec, ProtocolSpec, TypeSpec,
};

fn game_bundle() -> Vec<u8> {
    bundle(
        &[
            TypeSpec {
                name: "base.package",
                fields: vec![FieldSpec::integer("type", 0), FieldSpec::integer("session", 1)],
            },
            TypeSpec {
                name: "login.req",
                fields: vec![FieldSpec::string("token", 0)],
            },
            TypeSpec {
                name: "login.resp",
                fields: vec![FieldSpec::boolean("ok", 0), FieldSpec::integer("uid", 1)],
            },
        ],
        &[
            ProtocolSpec { name: "login", tag: 1, request: Some(1), response: Some(2), confirm: false },
            ProtocolSpec { name: "ping", tag: 2, request: None, response: None, confirm: true },
            ProtocolSpec { name: "kick", tag: 10, request: Some(1), response: None, confirm: false },
        ],
    )
}

#[test]
fn loads_types_and_protocols() {
    let schema = Schema::load(&game_bundle()).unwrap();

    assert_eq!(schema.type_count(), 3);
    let package = schema.type_by_name("base.package").unwrap();
    let def = schema.type_def(package);
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.fields[0].name, "type");
    assert_eq!(def.fields[0].kind, FieldKind::Integer { scale: None });

    let login = schema.protocol_by_name("login").unwrap();
    assert_eq!(login.tag, 1);
    assert_eq!(login.request, schema.type_by_name("login.req"));
    assert_eq!(login.response, schema.type_by_name("login.resp"));
    assert!(!login.confirm);

    let ping = schema.protocol_by_tag(2).unwrap();
    assert_eq!(ping.name, "ping");
    assert!(ping.confirm);
    assert!(ping.request.is_none());

    assert!(schema.protocol_by_tag(3).is_none());
    assert!(schema.protocol_by_name("logout").is_none());
    assert_eq!(schema.protocols().count(), 3);
}

#[test]
fn field_lookup_contiguous_and_sparse() {
    let raw = bundle(
        &[
            TypeSpec {
                name: "dense",
                fields: vec![
                    FieldSpec::integer("a", 0),
                    FieldSpec::integer("b", 1),
                    FieldSpec::integer("c", 2),
                ],
            },
            TypeSpec {
                name: "sparse",
                fields: vec![
                    FieldSpec::integer("a", 0),
                    FieldSpec::integer("b", 7),
                    FieldSpec::integer("c", 30),
                ],
            },
        ],
        &[],
    );
    let schema = Schema::load(&raw).unwrap();

    let dense = schema.type_def(schema.type_by_name("dense").unwrap());
    assert_eq!(dense.find_field(1).map(|f| f.name.as_str()), Some("b"));
    assert_eq!(dense.find_field(3), None);

    let sparse = schema.type_def(schema.type_by_name("sparse").unwrap());
    assert_eq!(sparse.find_field(7).map(|f| f.name.as_str()), Some("b"));
    assert_eq!(sparse.find_field(30).map(|f| f.name.as_str()), Some("c"));
    assert_eq!(sparse.find_field(8), None);
}

#[test]
fn person_schema_shape() {
    let schema = Schema::load(&person_bundle()).unwrap();
    let person = schema.type_def(schema.type_by_name("person").unwrap());

    assert_eq!(person.fields[3].name, "children");
    assert!(person.fields[3].array);
    assert!(matches!(person.fields[3].kind, FieldKind::Struct(_)));
    assert_eq!(person.fields[0].kind, FieldKind::String { binary: false });
}

#[test]
fn rejects_non_monotonic_field_tags() {
    let raw = bundle(
        &[TypeSpec {
            name: "bad",
            fields: vec![FieldSpec::integer("a", 5), FieldSpec::integer("b", 3)],
        }],
        &[],
    );
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::TagNotMonotonic { last: 5, tag: 3, .. })
    ));
}

#[test]
fn rejects_unknown_meta_tag() {
    // A field record with meta-tag 6, which the format does not define.
    let field = record(&[
        (0, Entry::Chunk(b"x".to_vec())),
        (1, Entry::Inline(0)),
        (3, Entry::Inline(0)),
        (6, Entry::Inline(1)),
    ]);
    let ty = record(&[
        (0, Entry::Chunk(b"bad".to_vec())),
        (1, Entry::Chunk(chunk_list(&[field]))),
    ]);
    let raw = record(&[(0, Entry::Chunk(chunk_list(&[ty])))]);

    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::UnknownMetaTag { tag: 6 })
    ));
}

#[test]
fn rejects_subtype_out_of_range() {
    let raw = bundle(
        &[TypeSpec {
            name: "bad",
            fields: vec![FieldSpec::structure("child", 0, 7)],
        }],
        &[],
    );
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::TypeIndexOutOfRange { index: 7, count: 1 })
    ));
}

#[test]
fn rejects_protocol_type_out_of_range() {
    let raw = bundle(
        &[],
        &[ProtocolSpec { name: "p", tag: 1, request: Some(0), response: None, confirm: false }],
    );
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::TypeIndexOutOfRange { index: 0, count: 0 })
    ));
}

#[test]
fn rejects_unsorted_protocols() {
    let raw = bundle(
        &[],
        &[
            ProtocolSpec { name: "b", tag: 9, request: None, response: None, confirm: false },
            ProtocolSpec { name: "a", tag: 2, request: None, response: None, confirm: false },
        ],
    );
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::ProtocolOrder { last: 9, tag: 2 })
    ));
}

#[test]
fn rejects_inline_values_in_outer_record() {
    // Outer record whose first slot is inline instead of a data pointer.
    let raw = vec![0x01, 0x00, 0x04, 0x00];
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::OuterInlineValue { value: 4 })
    ));
}

#[test]
fn rejects_truncated_bundle() {
    let good = game_bundle();
    for cut in [0, 1, 3, good.len() / 2, good.len() - 1] {
        let err = Schema::load(&good[..cut]);
        assert!(
            matches!(err, Err(SchemaError::Truncated { .. })),
            "prefix of {cut} bytes gave {err:?}"
        );
    }
}

#[test]
fn rejects_unknown_builtin() {
    let field = record(&[
        (0, Entry::Chunk(b"x".to_vec())),
        (1, Entry::Inline(9)),
        (3, Entry::Inline(0)),
    ]);
    let ty = record(&[
        (0, Entry::Chunk(b"bad".to_vec())),
        (1, Entry::Chunk(chunk_list(&[field]))),
    ]);
    let raw = record(&[(0, Entry::Chunk(chunk_list(&[ty])))]);

    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::UnknownBuiltin { code: 9 })
    ));
}

#[test]
fn decimal_exponent_bounds() {
    let raw = bundle(
        &[TypeSpec { name: "t", fields: vec![FieldSpec::decimal("v", 0, 25)] }],
        &[],
    );
    assert!(matches!(
        Schema::load(&raw),
        Err(SchemaError::ValueOutOfRange { .. })
    ));
}
