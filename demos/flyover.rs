use bevy::{input::mouse::MouseMotion, prelude::*};
use bevy_quadtree_terrain::prelude::*;

fn main() {
    App::new()
        .add_plugins((DefaultPlugins, TerrainPlugin, TerrainDebugPlugin))
        .add_systems(Startup, setup)
        .add_systems(Update, free_camera)
        .run();
}

fn setup(mut commands: Commands, mut materials: ResMut<Assets<StandardMaterial>>) {
    commands.spawn((
        Terrain,
        TerrainConfig::default(),
        TerrainMaterial(materials.add(StandardMaterial {
            base_color: Color::srgb(0.3, 0.5, 0.3),
            perceptual_roughness: 1.0,
            ..default()
        })),
    ));

    commands.spawn((
        Camera3d::default(),
        TerrainView,
        Transform::from_xyz(1024.0, 300.0, 1024.0).looking_at(Vec3::new(1024.0, 0.0, 0.0), Vec3::Y),
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 5000.0,
            ..default()
        },
        Transform::from_rotation(Quat::from_euler(EulerRot::XYZ, -1.0, 0.3, 0.0)),
    ));
}

fn free_camera(
    time: Res<Time>,
    keys: Res<ButtonInput<KeyCode>>,
    buttons: Res<ButtonInput<MouseButton>>,
    mut motions: EventReader<MouseMotion>,
    mut cameras: Query<&mut Transform, With<TerrainView>>,
) {
    let Ok(mut transform) = cameras.get_single_mut() else {
        return;
    };

    let mut direction = Vec3::ZERO;
    if keys.pressed(KeyCode::KeyW) {
        direction.z -= 1.0;
    }
    if keys.pressed(KeyCode::KeyS) {
        direction.z += 1.0;
    }
    if keys.pressed(KeyCode::KeyA) {
        direction.x -= 1.0;
    }
    if keys.pressed(KeyCode::KeyD) {
        direction.x += 1.0;
    }
    if keys.pressed(KeyCode::KeyQ) {
        direction.y -= 1.0;
    }
    if keys.pressed(KeyCode::KeyE) {
        direction.y += 1.0;
    }

    let speed = if keys.pressed(KeyCode::ShiftLeft) {
        600.0
    } else {
        150.0
    };
    let movement = transform.rotation * direction.normalize_or_zero() * speed * time.delta_secs();
    transform.translation += movement;

    if buttons.pressed(MouseButton::Right) {
        for motion in motions.read() {
            let (mut yaw, mut pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
            yaw -= motion.delta.x * 0.003;
            pitch = (pitch - motion.delta.y * 0.003).clamp(-1.54, 1.54);
            transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
        }
    } else {
        motions.clear();
    }
}
