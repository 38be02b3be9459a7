// Archivo: macros.rs
// Propósito: macro que implementa `DbEntity` para cada registro persistente.
//
// Uso:
//   impl_db_entity!(DeploymentEntity, Deployment, id);
//   impl_db_entity!(ExecutionEntity, Execution, id, revisioned);

macro_rules! impl_db_entity {
  ($ty:ident, $variant:ident, $id:ident) => {
    impl_db_entity!(@impl $ty, $variant, $id, {});
  };
  ($ty:ident, $variant:ident, $id:ident, revisioned) => {
    impl_db_entity!(@impl $ty, $variant, $id, {
      fn revision(&self) -> Option<i32> {
        Some(self.revision)
      }

      fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
      }
    });
  };
  (@impl $ty:ident, $variant:ident, $id:ident, { $($extra:tt)* }) => {
    impl $crate::entity::DbEntity for $ty {
      const KIND: $crate::entity::EntityKind = $crate::entity::EntityKind::$variant;

      fn id(&self) -> &str {
        &self.$id
      }

      fn set_id(&mut self, id: String) {
        self.$id = id;
      }

      fn into_entity(self) -> $crate::entity::Entity {
        $crate::entity::Entity::$variant(self)
      }

      fn from_entity(entity: $crate::entity::Entity) -> Option<Self> {
        match entity {
          $crate::entity::Entity::$variant(e) => Some(e),
          _ => None,
        }
      }

      $($extra)*
    }
  };
}
