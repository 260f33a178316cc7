//! Exception safety of the write paths: any failure rolls the database
//! back and leaves the in-memory object as a reloadable ghost.

mod common;

use common::{Item, Pair, TestDb};
use sqlanchor::{Error, Handle, Root, exists, none_saved};

#[test]
fn failed_update_rolls_back_both_writes() {
    let db = TestDb::open_memory().unwrap();

    let pair: Handle<Pair> = Handle::new(&db).unwrap();
    pair.borrow_mut().unwrap().set_both(1, 1).unwrap();
    pair.save().unwrap();

    pair.borrow_mut().unwrap().set_both(2, 2).unwrap();
    pair.borrow_mut().unwrap().fail_between_writes(true);
    assert!(pair.save().is_err());

    // The first update was executed before the failure, but the frame
    // was cancelled, so neither column changed on disk and the object
    // rehydrates to the stored state.
    pair.borrow_mut().unwrap().fail_between_writes(false);
    assert_eq!(pair.borrow_mut().unwrap().a().unwrap(), 1);
    assert_eq!(pair.borrow_mut().unwrap().b().unwrap(), 1);
}

#[test]
fn failure_after_insert_leaves_no_row_and_object_resavable() {
    let db = TestDb::open_memory().unwrap();

    let pair: Handle<Pair> = Handle::new(&db).unwrap();
    pair.borrow_mut().unwrap().set_both(3, 4).unwrap();
    pair.borrow_mut().unwrap().fail_between_writes(true);
    assert!(pair.save().is_err());

    // The insert itself succeeded inside the frame, but the failure
    // cancelled it: no row, no id, nothing registered in the map.
    assert!(none_saved::<Pair>(db.connection()).unwrap());
    assert!(matches!(pair.id(), Err(Error::UninitializedId)));
    assert!(!db.pairs().is_cached_by_id(1));

    pair.borrow_mut().unwrap().fail_between_writes(false);
    pair.save().unwrap();
    assert_eq!(pair.id().unwrap(), 1);
    assert!(exists::<Pair>(db.connection(), 1).unwrap());
}

#[test]
fn failed_hydration_leaves_the_object_loadable() {
    let db = TestDb::open_memory().unwrap();

    let item: Handle<Item> = Handle::new(&db).unwrap();
    item.borrow_mut().unwrap().set_x(9).unwrap();
    item.borrow_mut().unwrap().set_y(9.0).unwrap();
    item.save().unwrap();
    let id = item.id().unwrap();

    // Pull the row out from under the cached object.
    db.connection()
        .execute_sql("delete from items where item_id = 1")
        .unwrap();
    item.borrow_mut().unwrap().ghostify();
    assert!(item.borrow_mut().unwrap().x().is_err());

    // Restore the row; the object is still a ghost and hydrates cleanly.
    db.connection()
        .execute_sql("insert into items(item_id, x, y) values(1, 5, 5.0)")
        .unwrap();
    assert_eq!(item.borrow_mut().unwrap().x().unwrap(), 5);
    assert_eq!(item.id().unwrap(), id);
}

#[test]
fn update_failure_ghostifies_but_keeps_identity() {
    let db = TestDb::open_memory().unwrap();

    let pair: Handle<Pair> = Handle::new(&db).unwrap();
    pair.borrow_mut().unwrap().set_both(1, 1).unwrap();
    pair.save().unwrap();
    let id = pair.id().unwrap();

    pair.borrow_mut().unwrap().fail_between_writes(true);
    pair.borrow_mut().unwrap().set_both(7, 7).unwrap();
    assert!(pair.save().is_err());

    // Identity survives the failure: same id, still indexed by it.
    assert_eq!(pair.id().unwrap(), id);
    assert!(db.pairs().is_cached_by_id(id));
    let same: Handle<Pair> = Handle::by_id(&db, id).unwrap();
    assert_eq!(same, pair);
}
