//! Virtual and interface calls the way translated code issues them.

use ilrt::dispatch::{ToStringFn, OBJECT_SLOTS, TO_STRING};
use ilrt::{
    builtins, method, Frame, InterfaceVTable, Method, ObjRef, Runtime, RuntimeConfig,
    RuntimeError, TypeDescriptor, TypeKind, TypeRegistry,
};

/// `int Area()`, introduced by `Shape`.
const AREA: usize = OBJECT_SLOTS;
type AreaFn = fn(&Runtime, ObjRef) -> i32;

/// `interface IDescribe { int Sides(); }`
static DESCRIBE: TypeDescriptor = TypeDescriptor::new("Tests.IDescribe", TypeKind::Interface, 0, None);
type SidesFn = fn(&Runtime, ObjRef) -> i32;

fn shape_area(_rt: &Runtime, _this: ObjRef) -> i32 {
    -1
}

fn circle_area(rt: &Runtime, this: ObjRef) -> i32 {
    let radius: i32 = rt.field(this, 0);
    3 * radius * radius
}

fn circle_to_string(rt: &Runtime, _this: ObjRef) -> ObjRef {
    rt.new_string("circle")
}

fn square_sides(_rt: &Runtime, _this: ObjRef) -> i32 {
    4
}

fn tile_sides(_rt: &Runtime, _this: ObjRef) -> i32 {
    6
}

/// abstract class Shape { virtual int Area() => -1; }
static SHAPE_VTABLE: [Option<Method>; OBJECT_SLOTS + 1] =
    [None, None, None, method!(shape_area as AreaFn)];
static SHAPE: TypeDescriptor =
    TypeDescriptor::new("Tests.Shape", TypeKind::Reference, 0, Some(&builtins::OBJECT))
        .with_vtable(&SHAPE_VTABLE);

/// class Circle : Shape { int radius; overrides ToString and Area }
static CIRCLE_VTABLE: [Option<Method>; OBJECT_SLOTS + 1] = [
    method!(circle_to_string as ToStringFn),
    None,
    None,
    method!(circle_area as AreaFn),
];
static CIRCLE: TypeDescriptor =
    TypeDescriptor::new("Tests.Circle", TypeKind::Reference, 8, Some(&SHAPE))
        .with_vtable(&CIRCLE_VTABLE);

/// class Square : Shape, IDescribe { overrides nothing }
static SQUARE_SIDES: [Method; 1] = [Method::new(square_sides as SidesFn as *const ())];
static SQUARE_IFACES: [InterfaceVTable; 1] = [InterfaceVTable {
    interface: &DESCRIBE,
    methods: &SQUARE_SIDES,
}];
static SQUARE: TypeDescriptor =
    TypeDescriptor::new("Tests.Square", TypeKind::Reference, 0, Some(&SHAPE))
        .with_interface_vtables(&SQUARE_IFACES);

/// class Tile : Square { reimplements IDescribe }
static TILE_SIDES: [Method; 1] = [Method::new(tile_sides as SidesFn as *const ())];
static TILE_IFACES: [InterfaceVTable; 1] = [InterfaceVTable {
    interface: &DESCRIBE,
    methods: &TILE_SIDES,
}];
static TILE: TypeDescriptor = TypeDescriptor::new("Tests.Tile", TypeKind::Reference, 0, Some(&SQUARE))
    .with_interface_vtables(&TILE_IFACES);

fn runtime() -> Runtime {
    let mut types = TypeRegistry::new();
    types.register(&CIRCLE);
    types.register(&TILE);
    Runtime::initialize(RuntimeConfig::new().heap_size(8 * 1024), types).unwrap()
}

fn area(rt: &Runtime, obj: ObjRef) -> i32 {
    let method = rt.virtual_method(Some(obj), AREA).unwrap();
    let f: AreaFn = unsafe { method.as_fn() };
    f(rt, obj)
}

fn sides(rt: &Runtime, obj: ObjRef) -> Result<i32, RuntimeError> {
    let method = rt.interface_method(Some(obj), &DESCRIBE, 0)?;
    let f: SidesFn = unsafe { method.as_fn() };
    Ok(f(rt, obj))
}

#[test]
fn derived_override_wins_over_the_base_method() {
    let rt = runtime();
    rt.with_frame(|frame: &Frame<2>| {
        let circle = rt.new_object(&CIRCLE);
        frame.set(0, Some(circle));
        rt.set_field(circle, 0, 2i32);
        let square = rt.new_object(&SQUARE);
        frame.set(1, Some(square));

        assert_eq!(area(&rt, circle), 12);
        assert_eq!(area(&rt, square), -1);
    });
}

#[test]
fn to_string_falls_back_to_the_type_name() {
    let rt = runtime();
    rt.with_frame(|frame: &Frame<2>| {
        let circle = rt.new_object(&CIRCLE);
        frame.set(0, Some(circle));
        let square = rt.new_object(&SQUARE);
        frame.set(1, Some(square));

        let text = rt.invoke_to_string(Some(circle)).unwrap();
        assert_eq!(rt.string_to_rust(text).unwrap(), "circle");
        let text = rt.invoke_to_string(Some(square)).unwrap();
        assert_eq!(rt.string_to_rust(text).unwrap(), "Tests.Square");

        // The same slot resolves through Object for an override-free chain.
        let inherited = rt.virtual_method(Some(square), TO_STRING).unwrap();
        assert_eq!(inherited, builtins::OBJECT.resolve_virtual(TO_STRING).unwrap());
    });
}

#[test]
fn interface_calls_use_the_most_derived_table() {
    let rt = runtime();
    rt.with_frame(|frame: &Frame<3>| {
        let square = rt.new_object(&SQUARE);
        frame.set(0, Some(square));
        let tile = rt.new_object(&TILE);
        frame.set(1, Some(tile));
        let circle = rt.new_object(&CIRCLE);
        frame.set(2, Some(circle));

        assert_eq!(sides(&rt, square), Ok(4));
        assert_eq!(sides(&rt, tile), Ok(6));
        assert!(rt.is_instance(Some(tile), &DESCRIBE));
        assert_eq!(
            sides(&rt, circle),
            Err(RuntimeError::cast("Tests.IDescribe", "Tests.Circle"))
        );
        assert_eq!(
            rt.interface_method(None, &DESCRIBE, 0),
            Err(RuntimeError::NullReference)
        );
    });
}

#[test]
#[should_panic(expected = "interface slot outside the method table")]
fn interface_slot_past_the_table_is_fatal() {
    let rt = runtime();
    let square = rt.new_object(&SQUARE);
    let _ = rt.interface_method(Some(square), &DESCRIBE, 1);
}
