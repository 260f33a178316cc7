//! Example domain shared by the integration tests.
//!
//! `Item` is a standalone root with two lazy fields. `Vehicle` is an enum
//! root over `Car` and `Truck`, exercising checked downcasts.

#![allow(dead_code)]

use std::path::Path;
use std::rc::Rc;

use sqlanchor::{
    DatabaseConnection, Error, HasIdentityMap, IdentityMap, ObjectCore, Persistent, Result, Root,
    SqlStatement,
};

/// Test connection owning one identity map per root type.
pub struct TestDb {
    connection: Rc<DatabaseConnection>,
    items: IdentityMap<Item>,
    vehicles: IdentityMap<Vehicle>,
    pairs: IdentityMap<Pair>,
}

impl TestDb {
    pub fn open_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Rc::new(DatabaseConnection::new()?);
        connection.open(path)?;
        connection.execute_sql(
            "create table items(item_id integer primary key autoincrement, \
             x integer not null, y real not null)",
        )?;
        connection.execute_sql(
            "create table vehicles(vehicle_id integer primary key autoincrement, \
             kind text not null, wheels integer not null)",
        )?;
        connection.execute_sql(
            "create table pairs(pair_id integer primary key autoincrement, \
             a integer not null, b integer not null)",
        )?;
        Ok(Self {
            items: IdentityMap::new(Rc::clone(&connection)),
            vehicles: IdentityMap::new(Rc::clone(&connection)),
            pairs: IdentityMap::new(Rc::clone(&connection)),
            connection,
        })
    }

    pub fn connection(&self) -> &Rc<DatabaseConnection> {
        &self.connection
    }

    pub fn items(&self) -> &IdentityMap<Item> {
        &self.items
    }

    pub fn vehicles(&self) -> &IdentityMap<Vehicle> {
        &self.vehicles
    }

    pub fn pairs(&self) -> &IdentityMap<Pair> {
        &self.pairs
    }
}

impl HasIdentityMap<Item> for TestDb {
    fn identity_map(&self) -> &IdentityMap<Item> {
        &self.items
    }
}

impl HasIdentityMap<Vehicle> for TestDb {
    fn identity_map(&self) -> &IdentityMap<Vehicle> {
        &self.vehicles
    }
}

impl HasIdentityMap<Pair> for TestDb {
    fn identity_map(&self) -> &IdentityMap<Pair> {
        &self.pairs
    }
}

fn unset(field: &'static str) -> Error {
    Error::Logic(format!("field {field} has not been given a value"))
}

/// A standalone persisted type with lazily loaded fields.
pub struct Item {
    core: ObjectCore<Item>,
    x: Option<i32>,
    y: Option<f64>,
}

impl Item {
    pub fn x(&mut self) -> Result<i32> {
        self.load()?;
        self.x.ok_or_else(|| unset("x"))
    }

    pub fn y(&mut self) -> Result<f64> {
        self.load()?;
        self.y.ok_or_else(|| unset("y"))
    }

    pub fn set_x(&mut self, x: i32) -> Result<()> {
        self.load()?;
        self.x = Some(x);
        Ok(())
    }

    pub fn set_y(&mut self, y: f64) -> Result<()> {
        self.load()?;
        self.y = Some(y);
        Ok(())
    }
}

impl Persistent for Item {
    type Root = Item;

    fn exclusive_table_name() -> &'static str {
        "items"
    }

    fn from_core(core: ObjectCore<Item>) -> Item {
        Item {
            core,
            x: None,
            y: None,
        }
    }

    fn from_root(root: &Item) -> Option<&Item> {
        Some(root)
    }

    fn from_root_mut(root: &mut Item) -> Option<&mut Item> {
        Some(root)
    }
}

impl Root for Item {
    fn primary_key_name() -> &'static str {
        "item_id"
    }

    fn core(&self) -> &ObjectCore<Item> {
        &self.core
    }

    fn do_load(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core.connection(),
            "select x, y from items where item_id = :p",
        )?;
        statement.bind(":p", self.id()?)?;
        if !statement.step()? {
            return Err(Error::BadIdentifier(self.id()?));
        }
        self.x = Some(statement.extract(0)?);
        self.y = Some(statement.extract(1)?);
        statement.step_final()
    }

    fn do_save_existing(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core.connection(),
            "update items set x = :x, y = :y where item_id = :p",
        )?;
        statement.bind(":x", self.x.ok_or_else(|| unset("x"))?)?;
        statement.bind(":y", self.y.ok_or_else(|| unset("y"))?)?;
        statement.bind(":p", self.id()?)?;
        statement.step_final()
    }

    fn do_save_new(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core.connection(),
            "insert into items(x, y) values(:x, :y)",
        )?;
        statement.bind(":x", self.x.ok_or_else(|| unset("x"))?)?;
        statement.bind(":y", self.y.ok_or_else(|| unset("y"))?)?;
        statement.step_final()
    }

    fn do_ghostify(&mut self) {
        self.x = None;
        self.y = None;
    }
}

/// A type that writes its two columns with two separate statements and
/// can be told to fail between them, for exercising write atomicity.
pub struct Pair {
    core: ObjectCore<Pair>,
    a: Option<i32>,
    b: Option<i32>,
    fail_between_writes: bool,
}

impl Pair {
    pub fn a(&mut self) -> Result<i32> {
        self.load()?;
        self.a.ok_or_else(|| unset("a"))
    }

    pub fn b(&mut self) -> Result<i32> {
        self.load()?;
        self.b.ok_or_else(|| unset("b"))
    }

    pub fn set_both(&mut self, a: i32, b: i32) -> Result<()> {
        self.load()?;
        self.a = Some(a);
        self.b = Some(b);
        Ok(())
    }

    pub fn fail_between_writes(&mut self, fail: bool) {
        self.fail_between_writes = fail;
    }
}

impl Persistent for Pair {
    type Root = Pair;

    fn exclusive_table_name() -> &'static str {
        "pairs"
    }

    fn from_core(core: ObjectCore<Pair>) -> Pair {
        Pair {
            core,
            a: None,
            b: None,
            fail_between_writes: false,
        }
    }

    fn from_root(root: &Pair) -> Option<&Pair> {
        Some(root)
    }

    fn from_root_mut(root: &mut Pair) -> Option<&mut Pair> {
        Some(root)
    }
}

impl Root for Pair {
    fn primary_key_name() -> &'static str {
        "pair_id"
    }

    fn core(&self) -> &ObjectCore<Pair> {
        &self.core
    }

    fn do_load(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core.connection(),
            "select a, b from pairs where pair_id = :p",
        )?;
        statement.bind(":p", self.id()?)?;
        if !statement.step()? {
            return Err(Error::BadIdentifier(self.id()?));
        }
        self.a = Some(statement.extract(0)?);
        self.b = Some(statement.extract(1)?);
        statement.step_final()
    }

    fn do_save_existing(&mut self) -> Result<()> {
        let mut first = SqlStatement::new(
            self.core.connection(),
            "update pairs set a = :a where pair_id = :p",
        )?;
        first.bind(":a", self.a.ok_or_else(|| unset("a"))?)?;
        first.bind(":p", self.id()?)?;
        first.step_final()?;
        if self.fail_between_writes {
            return Err(Error::Logic("simulated failure between writes".to_string()));
        }
        let mut second = SqlStatement::new(
            self.core.connection(),
            "update pairs set b = :b where pair_id = :p",
        )?;
        second.bind(":b", self.b.ok_or_else(|| unset("b"))?)?;
        second.bind(":p", self.id()?)?;
        second.step_final()
    }

    fn do_save_new(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core.connection(),
            "insert into pairs(a, b) values(:a, :b)",
        )?;
        statement.bind(":a", self.a.ok_or_else(|| unset("a"))?)?;
        statement.bind(":b", self.b.ok_or_else(|| unset("b"))?)?;
        if self.fail_between_writes {
            statement.step_final()?;
            return Err(Error::Logic("simulated failure after insert".to_string()));
        }
        statement.step_final()
    }

    fn do_ghostify(&mut self) {
        self.a = None;
        self.b = None;
    }
}

/// Root of a small hierarchy: every vehicle's primary key lives in the
/// `vehicles` table, and the concrete kind is one of the enum variants.
pub enum Vehicle {
    Car(Car),
    Truck(Truck),
}

pub struct Car {
    core: ObjectCore<Vehicle>,
    wheels: Option<i32>,
}

pub struct Truck {
    core: ObjectCore<Vehicle>,
    wheels: Option<i32>,
}

impl Car {
    pub fn wheels(&self) -> Result<i32> {
        self.wheels.ok_or_else(|| unset("wheels"))
    }

    pub fn set_wheels(&mut self, wheels: i32) {
        self.wheels = Some(wheels);
    }
}

impl Truck {
    pub fn wheels(&self) -> Result<i32> {
        self.wheels.ok_or_else(|| unset("wheels"))
    }

    pub fn set_wheels(&mut self, wheels: i32) {
        self.wheels = Some(wheels);
    }
}

impl Vehicle {
    fn kind(&self) -> &'static str {
        match self {
            Vehicle::Car(_) => "car",
            Vehicle::Truck(_) => "truck",
        }
    }

    fn wheels_mut(&mut self) -> &mut Option<i32> {
        match self {
            Vehicle::Car(car) => &mut car.wheels,
            Vehicle::Truck(truck) => &mut truck.wheels,
        }
    }

    fn wheels_value(&self) -> Result<i32> {
        match self {
            Vehicle::Car(car) => car.wheels(),
            Vehicle::Truck(truck) => truck.wheels(),
        }
    }
}

impl Persistent for Vehicle {
    type Root = Vehicle;

    fn exclusive_table_name() -> &'static str {
        "vehicles"
    }

    // A root-typed request materializes the default variant; the concrete
    // variant of an already cached object is whatever first created it.
    fn from_core(core: ObjectCore<Vehicle>) -> Vehicle {
        Vehicle::Car(Car { core, wheels: None })
    }

    fn from_root(root: &Vehicle) -> Option<&Vehicle> {
        Some(root)
    }

    fn from_root_mut(root: &mut Vehicle) -> Option<&mut Vehicle> {
        Some(root)
    }
}

impl Persistent for Car {
    type Root = Vehicle;

    fn exclusive_table_name() -> &'static str {
        "vehicles"
    }

    fn from_core(core: ObjectCore<Vehicle>) -> Vehicle {
        Vehicle::Car(Car { core, wheels: None })
    }

    fn from_root(root: &Vehicle) -> Option<&Car> {
        match root {
            Vehicle::Car(car) => Some(car),
            Vehicle::Truck(_) => None,
        }
    }

    fn from_root_mut(root: &mut Vehicle) -> Option<&mut Car> {
        match root {
            Vehicle::Car(car) => Some(car),
            Vehicle::Truck(_) => None,
        }
    }
}

impl Persistent for Truck {
    type Root = Vehicle;

    fn exclusive_table_name() -> &'static str {
        "vehicles"
    }

    fn from_core(core: ObjectCore<Vehicle>) -> Vehicle {
        Vehicle::Truck(Truck { core, wheels: None })
    }

    fn from_root(root: &Vehicle) -> Option<&Truck> {
        match root {
            Vehicle::Truck(truck) => Some(truck),
            Vehicle::Car(_) => None,
        }
    }

    fn from_root_mut(root: &mut Vehicle) -> Option<&mut Truck> {
        match root {
            Vehicle::Truck(truck) => Some(truck),
            Vehicle::Car(_) => None,
        }
    }
}

impl Root for Vehicle {
    fn primary_key_name() -> &'static str {
        "vehicle_id"
    }

    fn core(&self) -> &ObjectCore<Vehicle> {
        match self {
            Vehicle::Car(car) => &car.core,
            Vehicle::Truck(truck) => &truck.core,
        }
    }

    fn do_load(&mut self) -> Result<()> {
        let id = self.id()?;
        let mut statement = SqlStatement::new(
            self.core().connection(),
            "select wheels from vehicles where vehicle_id = :p",
        )?;
        statement.bind(":p", id)?;
        if !statement.step()? {
            return Err(Error::BadIdentifier(id));
        }
        let wheels: i32 = statement.extract(0)?;
        statement.step_final()?;
        *self.wheels_mut() = Some(wheels);
        Ok(())
    }

    fn do_save_existing(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core().connection(),
            "update vehicles set kind = :k, wheels = :w where vehicle_id = :p",
        )?;
        statement.bind(":k", self.kind())?;
        statement.bind(":w", self.wheels_value()?)?;
        statement.bind(":p", self.id()?)?;
        statement.step_final()
    }

    fn do_save_new(&mut self) -> Result<()> {
        let mut statement = SqlStatement::new(
            self.core().connection(),
            "insert into vehicles(kind, wheels) values(:k, :w)",
        )?;
        statement.bind(":k", self.kind())?;
        statement.bind(":w", self.wheels_value()?)?;
        statement.step_final()
    }

    fn do_ghostify(&mut self) {
        *self.wheels_mut() = None;
    }
}
